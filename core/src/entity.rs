//! The generic entity lifecycle.
//!
//! # Overview
//! An `Entity<R>` mirrors one remote resource: an identifier, an optional
//! canonical `uri`, and the typed fields `R`. Concrete resource types only
//! describe themselves through `Resource` (URL segment, field whitelist,
//! id alias, query style, write shaping); everything else lives here.
//!
//! # Design
//! - Only whitelisted fields cross the wire or the cache. Anything else on
//!   `R` is client-side state.
//! - `update` merges in place. Nested objects are merged key by key, so a
//!   nested record keeps its identity across refreshes.
//! - Failures never escape as errors. Every operation yields `None` and
//!   leaves the entity in its prior state.
//! - After a successful delete the id is cleared and the entity becomes
//!   `Removed`; a second `remove` is a no-op.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::locator::{Locate, Target};
use crate::query::{Query, QueryStyle};
use crate::services::Services;
use crate::types::EntityId;

/// Description of a concrete resource type.
pub trait Resource: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// URL segment and cache entity name.
    const RESOURCE: &'static str;

    /// Fields round-tripped to and from the remote representation.
    const PROPERTIES: &'static [&'static str];

    /// Native identifier field mapped onto `id` (`nid`, `uid`, ...).
    const ID_ALIAS: Option<&'static str> = None;

    const QUERY_STYLE: QueryStyle = QueryStyle::Flat;

    /// Adjust the payload sent on create/update.
    fn shape_write(&self, _payload: &mut Map<String, Value>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityState {
    #[default]
    Unbound,
    Loading,
    Bound,
    Saving,
    Removed,
}

/// Outcome of a load: either the entity itself was refreshed, or the
/// server answered with a collection.
#[derive(Debug)]
pub enum Loaded<'a, T> {
    Single(&'a mut T),
    Collection(Vec<T>),
}

impl<T> Loaded<'_, T> {
    pub fn is_single(&self) -> bool {
        matches!(self, Loaded::Single(_))
    }

    /// The collection, if that is what came back.
    pub fn into_collection(self) -> Option<Vec<T>> {
        match self {
            Loaded::Single(_) => None,
            Loaded::Collection(items) => Some(items),
        }
    }
}

/// Owned counterpart of `Loaded`, returned by `Entity::fetch`.
#[derive(Debug)]
pub enum Fetched<T> {
    Single(T),
    Collection(Vec<T>),
}

#[async_trait]
pub trait Loadable: Send + Sized {
    async fn load<'a>(&'a mut self, services: &'a Services) -> Option<Loaded<'a, Self>>;
}

#[async_trait]
pub trait Saveable: Send + Sized {
    async fn save<'a>(&'a mut self, services: &'a Services) -> Option<&'a mut Self>;
}

#[async_trait]
pub trait Removable: Send {
    /// The server's acknowledgement, or `None` when nothing was removed.
    async fn remove(&mut self, services: &Services) -> Option<Value>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity<R> {
    id: EntityId,
    uri: Option<String>,
    state: EntityState,
    fields: R,
}

impl<R: Resource> Entity<R> {
    /// A bound entity with the given fields and no identifier.
    pub fn new(fields: R) -> Self {
        Self {
            id: EntityId::default(),
            uri: None,
            state: EntityState::Bound,
            fields,
        }
    }

    /// An unbound entity that only knows its identifier.
    pub fn with_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Construct from a remote representation, applying the whitelist.
    pub fn from_value(data: &Value) -> Self {
        let mut entity = Self::default();
        if entity.update(data) {
            entity.state = EntityState::Bound;
        }
        entity
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<EntityId>) {
        self.id = id.into();
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn fields(&self) -> &R {
        &self.fields
    }

    pub fn into_fields(self) -> R {
        self.fields
    }

    /// Merge `payload` into this entity.
    ///
    /// Only keys that are whitelisted and already present on the entity are
    /// copied; nulls are ignored. Returns false when `payload` is not an
    /// object or could not be merged into the typed fields.
    pub fn update(&mut self, payload: &Value) -> bool {
        let Some(incoming) = payload.as_object() else {
            return false;
        };

        let id = R::ID_ALIAS
            .and_then(|alias| incoming.get(alias))
            .and_then(EntityId::from_value)
            .or_else(|| incoming.get("id").and_then(EntityId::from_value));
        if let Some(id) = id {
            self.id = id;
        }
        if let Some(uri) = incoming.get("uri").and_then(Value::as_str).filter(|u| !u.is_empty()) {
            self.uri = Some(uri.to_string());
        }

        let mut current = match serde_json::to_value(&self.fields) {
            Ok(Value::Object(current)) => current,
            Ok(_) => return false,
            Err(e) => {
                warn!(resource = R::RESOURCE, error = %e, "failed to project entity fields");
                return false;
            }
        };
        let mut touched = false;
        for (key, value) in incoming {
            if !R::PROPERTIES.contains(&key.as_str()) {
                continue;
            }
            if let Some(slot) = current.get_mut(key) {
                touched |= merge_value(slot, value);
            }
        }
        if !touched {
            return true;
        }
        match serde_json::from_value(Value::Object(current)) {
            Ok(fields) => {
                self.fields = fields;
                true
            }
            Err(e) => {
                warn!(resource = R::RESOURCE, error = %e, "discarding unmergeable payload");
                false
            }
        }
    }

    /// Whitelisted representation: `id`, `uri` when known, and every
    /// declared property.
    pub fn projection(&self) -> Map<String, Value> {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(self.id.to_string()));
        if let Some(uri) = &self.uri {
            object.insert("uri".to_string(), Value::String(uri.clone()));
        }
        if let Ok(Value::Object(fields)) = serde_json::to_value(&self.fields) {
            for (key, value) in fields {
                if R::PROPERTIES.contains(&key.as_str()) {
                    object.insert(key, value);
                }
            }
        }
        object
    }

    /// Payload for create/update. An unset id is dropped so the server
    /// treats the write as a create.
    pub fn write_payload(&self) -> Value {
        let mut payload = self.projection();
        if !self.id.is_set() {
            payload.remove("id");
        }
        self.fields.shape_write(&mut payload);
        Value::Object(payload)
    }

    /// Search parameters built from the entity's own non-empty scalar
    /// fields. Empty once the entity has an identifier.
    pub fn get_query(&self) -> Query {
        let mut query = Query::new();
        if self.id.is_set() {
            return query;
        }
        for (key, value) in self.projection() {
            query.insert_scalar(&key, &value);
        }
        query.shaped(R::QUERY_STYLE)
    }

    fn persist(&self, services: &Services) {
        if let Some(cache) = services.entity_cache() {
            if self.id.is_set() {
                cache.store(R::RESOURCE, self.id.as_str(), &self.projection());
            }
        }
    }

    fn hydrate(services: &Services, items: Vec<Value>) -> Vec<Self> {
        items
            .iter()
            .map(|item| {
                let entity = Self::from_value(item);
                entity.persist(services);
                entity
            })
            .collect()
    }

    /// Construct from `initial` and immediately load it.
    pub async fn fetch(services: &Services, initial: &Value) -> Option<Fetched<Self>> {
        let mut entity = Self::from_value(initial);
        let collection = entity.load(services).await?.into_collection();
        Some(match collection {
            Some(items) => Fetched::Collection(items),
            None => Fetched::Single(entity),
        })
    }

    /// Fetch every entity of this type matching `query`.
    pub async fn index(services: &Services, query: &Query) -> Option<Vec<Self>> {
        let query = query.shaped(R::QUERY_STYLE);
        let response = services
            .api(R::RESOURCE)
            .get(&Target::collection(), None, &query)
            .await?;
        match response {
            Value::Array(items) => Some(Self::hydrate(services, items)),
            other => {
                warn!(resource = R::RESOURCE, response = %other, "index did not return a list");
                None
            }
        }
    }
}

impl<R> Locate for Entity<R> {
    fn locate_id(&self) -> Option<&str> {
        self.id.is_set().then(|| self.id.as_str())
    }

    fn locate_uri(&self) -> Option<&str> {
        self.uri.as_deref().filter(|u| !u.is_empty())
    }
}

impl<R> Deref for Entity<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.fields
    }
}

impl<R> DerefMut for Entity<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.fields
    }
}

#[async_trait]
impl<R: Resource> Loadable for Entity<R> {
    async fn load<'a>(&'a mut self, services: &'a Services) -> Option<Loaded<'a, Self>> {
        if self.state == EntityState::Removed || !self.id.is_set() {
            return None;
        }
        let previous = self.state;

        if let Some(cache) = services.entity_cache() {
            if let Some(stored) = cache.retrieve(R::RESOURCE, self.id.as_str()) {
                debug!(resource = R::RESOURCE, id = %self.id, "loaded from cache");
                self.update(&Value::Object(stored));
                self.state = EntityState::Bound;
                return Some(Loaded::Single(self));
            }
        }

        self.state = EntityState::Loading;
        let response = services
            .api(R::RESOURCE)
            .get(&*self, None, &Query::new())
            .await;
        match response {
            None => {
                self.state = previous;
                None
            }
            Some(Value::Array(items)) => {
                self.state = previous;
                Some(Loaded::Collection(Self::hydrate(services, items)))
            }
            Some(value) => {
                self.update(&value);
                self.state = EntityState::Bound;
                self.persist(services);
                Some(Loaded::Single(self))
            }
        }
    }
}

#[async_trait]
impl<R: Resource> Saveable for Entity<R> {
    async fn save<'a>(&'a mut self, services: &'a Services) -> Option<&'a mut Self> {
        if self.state == EntityState::Removed {
            warn!(resource = R::RESOURCE, "refusing to save a removed entity");
            return None;
        }
        let previous = self.state;
        self.state = EntityState::Saving;

        let payload = self.write_payload();
        let response = services.api(R::RESOURCE).save(&*self, &payload).await;
        match response {
            Some(value) => {
                self.update(&value);
                self.state = EntityState::Bound;
                self.persist(services);
                Some(self)
            }
            None => {
                self.state = previous;
                None
            }
        }
    }
}

#[async_trait]
impl<R: Resource> Removable for Entity<R> {
    async fn remove(&mut self, services: &Services) -> Option<Value> {
        if !self.id.is_set() {
            return None;
        }
        if let Some(cache) = services.entity_cache() {
            cache.clear(R::RESOURCE, self.id.as_str());
        }

        let ack = services.api(R::RESOURCE).remove(&*self).await?;
        if is_truthy(&ack) {
            self.id.clear();
            self.uri = None;
            self.state = EntityState::Removed;
        }
        Some(ack)
    }
}

/// Recursive in-place merge. Returns whether anything was written.
fn merge_value(slot: &mut Value, incoming: &Value) -> bool {
    match (slot, incoming) {
        (_, Value::Null) => false,
        (Value::Object(current), Value::Object(incoming)) => {
            let mut touched = false;
            for (key, value) in incoming {
                if let Some(inner) = current.get_mut(key) {
                    touched |= merge_value(inner, value);
                }
            }
            touched
        }
        (slot, incoming) => {
            *slot = incoming.clone();
            true
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Bool(true) => true,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => items.first().map_or(true, is_truthy),
        Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, User};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Profile {
        label: String,
        owner: Owner,
        note: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Owner {
        name: String,
        mail: String,
    }

    impl Resource for Profile {
        const RESOURCE: &'static str = "profile";
        const PROPERTIES: &'static [&'static str] = &["label", "owner"];
    }

    #[test]
    fn update_copies_only_declared_properties() {
        let mut profile = Entity::new(Profile {
            note: "local".to_string(),
            ..Default::default()
        });
        assert!(profile.update(&json!({"label": "x", "note": "remote", "extra": 1})));
        assert_eq!(profile.label, "x");
        assert_eq!(profile.note, "local");
    }

    #[test]
    fn update_merges_nested_objects_in_place() {
        let mut profile = Entity::new(Profile {
            owner: Owner {
                name: "alice".to_string(),
                mail: "a@example.com".to_string(),
            },
            ..Default::default()
        });
        profile.update(&json!({"owner": {"mail": "new@example.com", "bogus": true}}));
        assert_eq!(profile.owner.name, "alice");
        assert_eq!(profile.owner.mail, "new@example.com");
    }

    #[test]
    fn update_ignores_nulls_and_non_objects() {
        let mut node = Entity::new(Node {
            title: "Keep".to_string(),
            ..Default::default()
        });
        assert!(!node.update(&json!([1, 2])));
        node.update(&json!({"title": null}));
        assert_eq!(node.title, "Keep");
    }

    #[test]
    fn update_rejects_mistyped_payload_without_partial_writes() {
        let mut node = Entity::new(Node {
            title: "Keep".to_string(),
            ..Default::default()
        });
        assert!(!node.update(&json!({"title": "New", "status": "published"})));
        assert_eq!(node.title, "Keep");
    }

    #[test]
    fn alias_sets_the_identifier() {
        let node = Entity::<Node>::from_value(&json!({"nid": "12", "title": "Hi", "type": "page"}));
        assert_eq!(node.id().as_str(), "12");
        assert_eq!(node.kind, "page");
        assert_eq!(node.state(), EntityState::Bound);
    }

    #[test]
    fn alias_wins_over_generic_id() {
        let user = Entity::<User>::from_value(&json!({"uid": 5, "id": "99"}));
        assert_eq!(user.id().as_str(), "5");
    }

    #[test]
    fn write_payload_drops_unset_id() {
        let node = Entity::new(Node {
            title: "Draft".to_string(),
            ..Default::default()
        });
        let payload = node.write_payload();
        assert!(payload.get("id").is_none());
        assert_eq!(payload["title"], "Draft");
    }

    #[test]
    fn write_payload_keeps_set_id() {
        let mut node = Entity::new(Node::default());
        node.set_id("42");
        assert_eq!(node.write_payload()["id"], "42");
    }

    #[test]
    fn user_password_only_travels_on_writes() {
        let user = Entity::new(User::new("alice", "a@example.com", "secret"));
        assert!(user.projection().get("pass").is_none());
        assert_eq!(user.write_payload()["pass"], "secret");
        assert!(user.get_query().get("parameters[pass]").is_none());
    }

    #[test]
    fn get_query_uses_non_empty_scalars_and_style() {
        let node = Entity::new(Node {
            title: "Hello".to_string(),
            kind: "page".to_string(),
            ..Default::default()
        });
        let query = node.get_query();
        assert_eq!(query.get("title"), Some("Hello"));
        assert_eq!(query.get("parameters[type]"), Some("page"));
        assert_eq!(query.len(), 2);
        assert_eq!(query, node.get_query());
    }

    #[test]
    fn get_query_is_empty_with_an_id() {
        let mut node = Entity::new(Node {
            title: "Hello".to_string(),
            ..Default::default()
        });
        node.set_id("3");
        assert!(node.get_query().is_empty());
    }

    #[test]
    fn truthiness_of_acknowledgements() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!([true])));
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!([false])));
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([0])));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("1")));
    }
}
