//! A small cookie jar persisted in the key-value store.
//!
//! Cookies are stored under `cookie:{name}` so a `FileStore`-backed jar
//! keeps the session credential across process restarts, the way a
//! browser keeps it across page loads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::Clock;
use crate::store::KeyValueStore;

const PREFIX: &str = "cookie:";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Attributes applied when a cookie is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    /// Lifetime in days; `None` keeps the cookie until it is removed.
    pub expires_days: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    /// Skip percent-encoding of the value.
    pub raw: bool,
}

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Epoch milliseconds.
    pub expires: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub raw: bool,
}

impl Cookie {
    fn encoded_value(&self) -> String {
        if self.raw {
            self.value.clone()
        } else {
            urlencoding::encode(&self.value).into_owned()
        }
    }

    /// `name=value` as sent in a `Cookie` request header.
    pub fn pair(&self) -> String {
        format!("{}={}", urlencoding::encode(&self.name), self.encoded_value())
    }

    /// Full `Set-Cookie` style rendering with attributes.
    pub fn to_set_cookie_string(&self) -> String {
        let mut out = self.pair();
        if let Some(expires) = self.expires.and_then(DateTime::<Utc>::from_timestamp_millis) {
            out.push_str(&format!("; expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT")));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; path={path}"));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; domain={domain}"));
        }
        if self.secure {
            out.push_str("; secure");
        }
        out
    }
}

#[derive(Clone)]
pub struct CookieJar {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CookieJar {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn write(&self, name: &str, value: &str, options: &CookieOptions) -> Cookie {
        let cookie = Cookie {
            name: name.to_string(),
            value: value.to_string(),
            expires: options
                .expires_days
                .map(|days| self.clock.now_millis().saturating_add(days.saturating_mul(DAY_MS))),
            path: options.path.clone(),
            domain: options.domain.clone(),
            secure: options.secure,
            raw: options.raw,
        };
        match serde_json::to_string(&cookie) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&format!("{PREFIX}{name}"), &raw) {
                    warn!(name, error = %e, "failed to persist cookie");
                }
            }
            Err(e) => warn!(name, error = %e, "failed to encode cookie"),
        }
        cookie
    }

    /// Live cookie named `name`; an expired one is removed.
    pub fn get(&self, name: &str) -> Option<Cookie> {
        let key = format!("{PREFIX}{name}");
        let raw = self.store.get(&key)?;
        let cookie: Cookie = match serde_json::from_str(&raw) {
            Ok(cookie) => cookie,
            Err(_) => {
                self.remove(name);
                return None;
            }
        };
        if cookie.expires.is_some_and(|at| self.clock.now_millis() > at) {
            self.remove(name);
            return None;
        }
        Some(cookie)
    }

    pub fn read(&self, name: &str) -> Option<String> {
        self.get(name).map(|c| c.value)
    }

    pub fn remove(&self, name: &str) {
        if let Err(e) = self.store.remove(&format!("{PREFIX}{name}")) {
            warn!(name, error = %e, "failed to remove cookie");
        }
    }

    /// Every live cookie, sorted by name.
    pub fn all(&self) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = self
            .store
            .keys()
            .iter()
            .filter_map(|key| key.strip_prefix(PREFIX))
            .filter_map(|name| self.get(name))
            .collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        cookies
    }

    /// `Cookie` request header value, if any cookie is live.
    pub fn header(&self) -> Option<String> {
        self.header_with(None)
    }

    /// Like `header`, with `credential` replacing any stored cookie of the
    /// same name. The credential value is sent as is.
    pub fn header_with(&self, credential: Option<(&str, &str)>) -> Option<String> {
        let mut pairs: Vec<String> = self
            .all()
            .iter()
            .filter(|cookie| credential.map_or(true, |(name, _)| cookie.name != name))
            .map(Cookie::pair)
            .collect();
        if let Some((name, value)) = credential {
            pairs.push(format!("{name}={value}"));
        }
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::store::MemoryStore;

    fn jar() -> (CookieJar, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (CookieJar::new(Arc::new(MemoryStore::new()), clock.clone()), clock)
    }

    #[test]
    fn write_then_read() {
        let (jar, _) = jar();
        jar.write("SESS1", "abc", &CookieOptions::default());
        assert_eq!(jar.read("SESS1").as_deref(), Some("abc"));
        assert_eq!(jar.header().as_deref(), Some("SESS1=abc"));
    }

    #[test]
    fn expired_cookie_is_evicted_on_read() {
        let (jar, clock) = jar();
        let options = CookieOptions {
            expires_days: Some(1),
            ..Default::default()
        };
        jar.write("SESS1", "abc", &options);
        clock.advance_secs(24 * 60 * 60 + 1);
        assert!(jar.read("SESS1").is_none());
        assert!(jar.header().is_none());
    }

    #[test]
    fn set_cookie_string_carries_attributes() {
        let (jar, _) = jar();
        let options = CookieOptions {
            expires_days: Some(1),
            path: Some("/".to_string()),
            domain: Some("example.com".to_string()),
            secure: true,
            raw: false,
        };
        let cookie = jar.write("SESS1", "a b", &options);
        assert_eq!(
            cookie.to_set_cookie_string(),
            "SESS1=a%20b; expires=Fri, 02 Jan 1970 00:00:00 GMT; path=/; domain=example.com; secure"
        );
    }

    #[test]
    fn header_joins_cookies_in_name_order() {
        let (jar, _) = jar();
        jar.write("b", "2", &CookieOptions::default());
        jar.write("a", "1", &CookieOptions::default());
        assert_eq!(jar.header().as_deref(), Some("a=1; b=2"));
        jar.remove("a");
        assert_eq!(jar.header().as_deref(), Some("b=2"));
    }

    #[test]
    fn credential_replaces_the_stored_cookie_of_the_same_name() {
        let (jar, _) = jar();
        jar.write("SESS1", "stale", &CookieOptions::default());
        jar.write("lang", "en", &CookieOptions::default());
        assert_eq!(jar.header_with(Some(("SESS1", "live"))).as_deref(), Some("lang=en; SESS1=live"));
        jar.remove("lang");
        jar.remove("SESS1");
        assert_eq!(jar.header_with(Some(("SESS1", "live"))).as_deref(), Some("SESS1=live"));
        assert!(jar.header_with(None).is_none());
    }

    #[test]
    fn far_future_expiry_saturates() {
        let (jar, clock) = jar();
        let options = CookieOptions {
            expires_days: Some(i64::MAX),
            ..Default::default()
        };
        let cookie = jar.write("SESS1", "abc", &options);
        assert_eq!(cookie.expires, Some(i64::MAX));
        clock.advance_secs(365 * 24 * 60 * 60);
        assert_eq!(jar.read("SESS1").as_deref(), Some("abc"));
    }
}
