//! Client-side caching of remote resources.
//!
//! Three strategies exist and exactly one is active per `Services`:
//!
//! - `Response`: read-through cache of GET responses keyed by the
//!   normalised request URL, stored as `{url, data, expires}`.
//! - `WholeObject`: each entity projection stored under
//!   `{entityType}-{id}` with an embedded `expires`.
//! - `PerField`: each non-empty field stored under
//!   `{entityType}-{id}-{field}`, with an `{entityType}-{id}-expires`
//!   marker.
//!
//! Expired records are evicted when read, never proactively.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::KeyValueStore;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self(AtomicI64::new(now_millis))
    }

    pub fn set(&self, now_millis: i64) {
        self.0.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.0.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which persistence strategy a `Services` instance runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    #[default]
    Disabled,
    Response,
    WholeObject,
    PerField,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "disabled" | "none" | "off" => Ok(CacheStrategy::Disabled),
            "response" => Ok(CacheStrategy::Response),
            "whole_object" | "object" => Ok(CacheStrategy::WholeObject),
            "per_field" | "field" => Ok(CacheStrategy::PerField),
            other => Err(format!("unknown cache strategy: {other}")),
        }
    }
}

/// Stored form of one cached GET response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    data: Value,
    expires: i64,
}

/// Cache key for a request URL: every non-alphanumeric character dropped.
pub fn url_key(url: &str) -> String {
    url.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Read-through cache of GET responses.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            ttl_ms: ttl_ms(ttl_secs),
        }
    }

    /// Fresh data stored under `key` for exactly `url`.
    ///
    /// An entry recorded for another URL is a miss and stays in place; an
    /// expired one is evicted.
    pub fn get(&self, key: &str, url: &str) -> Option<Value> {
        let raw = self.store.get(key)?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "dropping unreadable cache entry");
                self.invalidate(key);
                return None;
            }
        };
        if self.clock.now_millis() > entry.expires {
            debug!(key, "cache entry expired");
            self.invalidate(key);
            return None;
        }
        if entry.url != url {
            debug!(key, cached = %entry.url, requested = url, "cache entry is for another url");
            return None;
        }
        Some(entry.data)
    }

    pub fn put(&self, key: &str, url: &str, data: &Value) {
        let entry = CacheEntry {
            url: url.to_string(),
            data: data.clone(),
            expires: self.clock.now_millis() + self.ttl_ms,
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = self.store.set(key, &raw) {
                    warn!(key, error = %e, "failed to write cache entry");
                }
            }
            Err(e) => warn!(key, error = %e, "failed to encode cache entry"),
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "failed to evict cache entry");
        }
    }
}

/// Key layout for entity-level persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLayout {
    WholeObject,
    PerField,
}

/// Entity-level persistence keyed by entity type and id.
#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    layout: EntityLayout,
}

const EXPIRES: &str = "expires";

impl EntityCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl_secs: u64, layout: EntityLayout) -> Self {
        Self {
            store,
            clock,
            ttl_ms: ttl_ms(ttl_secs),
            layout,
        }
    }

    pub fn layout(&self) -> EntityLayout {
        self.layout
    }

    pub fn store(&self, entity: &str, id: &str, projection: &Map<String, Value>) {
        let expires = self.clock.now_millis() + self.ttl_ms;
        let result = match self.layout {
            EntityLayout::WholeObject => {
                let mut object = projection.clone();
                object.insert(EXPIRES.to_string(), Value::from(expires));
                self.store
                    .set(&object_key(entity, id), &Value::Object(object).to_string())
            }
            EntityLayout::PerField => {
                // Drop remnants of a previous, possibly wider, projection.
                self.remove_fields(entity, id);
                let mut result = Ok(());
                for (field, value) in projection.iter().filter(|(_, v)| !is_empty(v)) {
                    result = result.and(self.store.set(&field_key(entity, id, field), &value.to_string()));
                }
                result.and(self.store.set(&field_key(entity, id, EXPIRES), &expires.to_string()))
            }
        };
        if let Err(e) = result {
            warn!(entity, id, error = %e, "failed to persist entity");
        }
    }

    /// Stored projection, or `None` when absent or expired.
    pub fn retrieve(&self, entity: &str, id: &str) -> Option<Map<String, Value>> {
        let now = self.clock.now_millis();
        match self.layout {
            EntityLayout::WholeObject => {
                let key = object_key(entity, id);
                let raw = self.store.get(&key)?;
                let mut object = match serde_json::from_str::<Value>(&raw) {
                    Ok(Value::Object(object)) => object,
                    _ => {
                        warn!(key, "dropping unreadable entity record");
                        self.clear(entity, id);
                        return None;
                    }
                };
                let expires = object.remove(EXPIRES).and_then(|v| v.as_i64()).unwrap_or(0);
                if now > expires {
                    debug!(key, "entity record expired");
                    self.clear(entity, id);
                    return None;
                }
                Some(object)
            }
            EntityLayout::PerField => {
                let expires: i64 = self.store.get(&field_key(entity, id, EXPIRES))?.parse().ok()?;
                if now > expires {
                    debug!(entity, id, "entity fields expired");
                    self.clear(entity, id);
                    return None;
                }
                let prefix = field_key(entity, id, "");
                let mut object = Map::new();
                for key in self.store.keys() {
                    let Some(field) = key.strip_prefix(&prefix) else {
                        continue;
                    };
                    if field == EXPIRES {
                        continue;
                    }
                    if let Some(value) = self.store.get(&key).and_then(|raw| serde_json::from_str(&raw).ok()) {
                        object.insert(field.to_string(), value);
                    }
                }
                Some(object)
            }
        }
    }

    pub fn clear(&self, entity: &str, id: &str) {
        match self.layout {
            EntityLayout::WholeObject => {
                if let Err(e) = self.store.remove(&object_key(entity, id)) {
                    warn!(entity, id, error = %e, "failed to clear entity record");
                }
            }
            EntityLayout::PerField => self.remove_fields(entity, id),
        }
    }

    fn remove_fields(&self, entity: &str, id: &str) {
        let prefix = field_key(entity, id, "");
        for key in self.store.keys().into_iter().filter(|k| k.starts_with(&prefix)) {
            if let Err(e) = self.store.remove(&key) {
                warn!(key, error = %e, "failed to clear entity field");
            }
        }
    }
}

fn ttl_ms(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn object_key(entity: &str, id: &str) -> String {
    format!("{entity}-{id}")
}

fn field_key(entity: &str, id: &str, field: &str) -> String {
    format!("{entity}-{id}-{field}")
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
