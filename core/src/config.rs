//! Client configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheStrategy;
use crate::cookie::CookieOptions;

/// Default lifetime of cached records, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Base URL of the Services endpoint, e.g. `https://example.com/rest`.
    pub endpoint: String,
    pub cache: CacheStrategy,
    pub cache_ttl_secs: u64,
    /// Attributes for the session cookie.
    pub cookie: CookieOptions,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost/rest".to_string(),
            cache: CacheStrategy::Disabled,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cookie: CookieOptions::default(),
        }
    }
}

impl ServicesConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, cache: CacheStrategy) -> Self {
        self.cache = cache;
        self
    }

    /// Defaults overlaid with `SERVICES_ENDPOINT`, `SERVICES_CACHE` and
    /// `SERVICES_CACHE_TTL`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup("SERVICES_ENDPOINT") {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(cache) = lookup("SERVICES_CACHE") {
            match cache.parse() {
                Ok(strategy) => config.cache = strategy,
                Err(e) => warn!(value = %cache, error = %e, "ignoring SERVICES_CACHE"),
            }
        }
        if let Some(ttl) = lookup("SERVICES_CACHE_TTL") {
            match ttl.parse() {
                Ok(secs) => config.cache_ttl_secs = secs,
                Err(e) => warn!(value = %ttl, error = %e, "ignoring SERVICES_CACHE_TTL"),
            }
        }
        config
    }
}
