//! Query-string parameters and the per-resource shaping strategy.

use std::collections::BTreeMap;

use serde_json::Value;

/// How a resource type spells its search parameters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStyle {
    /// `key=value`.
    Flat,
    /// Every key becomes `parameters[key]=value`.
    Nested,
    /// Only the listed keys are wrapped as `parameters[key]`.
    NestedFields(&'static [&'static str]),
}

impl QueryStyle {
    /// Wire name for `key` under this style.
    pub fn key(&self, key: &str) -> String {
        let wrap = match self {
            QueryStyle::Flat => false,
            QueryStyle::Nested => true,
            QueryStyle::NestedFields(fields) => fields.contains(&key),
        };
        if wrap && !key.starts_with("parameters[") {
            format!("parameters[{key}]")
        } else {
            key.to_string()
        }
    }
}

/// Ordered query parameters.
///
/// Keys are emitted literally so bracketed names stay readable; values are
/// percent-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style `insert`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Rewrite every key through `style`.
    pub fn shaped(&self, style: QueryStyle) -> Query {
        Query(self.0.iter().map(|(k, v)| (style.key(k), v.clone())).collect())
    }

    /// `a=1&b=2`, without the leading `?`.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Adds `value` under `key` when it is a non-empty scalar.
    ///
    /// Empty strings, zero, `false`, null and nested structures are skipped.
    pub fn insert_scalar(&mut self, key: &str, value: &Value) {
        if let Some(text) = scalar_text(value) {
            self.0.insert(key.to_string(), text);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Query(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}
