//! Identifiers and the concrete resource types shipped with the client.
//!
//! # Design
//! The remote service is loose with scalar types: ids and flags arrive as
//! numbers on one endpoint and as numeric strings on another. `EntityId`
//! and the `lenient` helpers accept either, so the typed fields below can
//! be merged from whatever the server sends.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::entity::Resource;
use crate::query::QueryStyle;

/// Remote identifier. Empty or `"0"` means "new / unsaved".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_set(&self) -> bool {
        !self.0.is_empty() && self.0 != "0"
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Truthy identifier carried by `value`, if any.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value {
            Value::String(s) => EntityId(s.clone()),
            Value::Number(n) => EntityId(n.to_string()),
            _ => return None,
        };
        id.is_set().then_some(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(EntityId::default()),
            Some(Value::String(s)) => Ok(EntityId(s)),
            Some(Value::Number(n)) => Ok(EntityId(n.to_string())),
            Some(other) => Err(serde::de::Error::custom(format!("invalid identifier: {other}"))),
        }
    }
}

pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Integer from a number, numeric string, bool or null (as 0).
    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| serde::de::Error::custom(format!("invalid integer: {n}"))),
            Value::String(s) if s.trim().is_empty() => Ok(0),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid integer: {s}"))),
            other => Err(serde::de::Error::custom(format!("invalid integer: {other}"))),
        }
    }
}

/// A content record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "lenient::int")]
    pub status: i64,
    /// Author.
    pub uid: EntityId,
}

impl Resource for Node {
    const RESOURCE: &'static str = "node";
    const PROPERTIES: &'static [&'static str] = &["title", "type", "status", "uid"];
    const ID_ALIAS: Option<&'static str> = Some("nid");
    const QUERY_STYLE: QueryStyle = QueryStyle::NestedFields(&["type"]);
}

/// A user account.
///
/// `pass` is never part of the round-tripped projection: it is sent on
/// writes only and never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub mail: String,
    #[serde(deserialize_with = "lenient::int")]
    pub status: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pass: String,
}

impl User {
    pub fn new(name: &str, mail: &str, pass: &str) -> Self {
        Self {
            name: name.to_string(),
            mail: mail.to_string(),
            status: 1,
            pass: pass.to_string(),
        }
    }
}

impl Resource for User {
    const RESOURCE: &'static str = "user";
    const PROPERTIES: &'static [&'static str] = &["name", "mail", "status"];
    const ID_ALIAS: Option<&'static str> = Some("uid");
    const QUERY_STYLE: QueryStyle = QueryStyle::Nested;

    fn shape_write(&self, payload: &mut Map<String, Value>) {
        if !self.pass.is_empty() {
            payload.insert("pass".to_string(), Value::String(self.pass.clone()));
        }
    }
}
