//! Session and identity management.
//!
//! # Design
//! The current session is the only shared mutable state in the client. It
//! lives in a `SessionContext` owned by `Services`, is read on every
//! outgoing request for credential attachment, and is written only by
//! connect, login and logout. Those three hold the context's async guard
//! for their whole round-trip, so a login can never interleave with a
//! logout issued from another task.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cookie::CookieJar;
use crate::entity::{Entity, Loadable, Loaded};
use crate::locator::Target;
use crate::services::Services;
use crate::store::KeyValueStore;
use crate::types::{EntityId, User};

/// Store key of the persisted session record. The sessid itself stays in
/// the cookie named by the record.
const SESSION_KEY: &str = "session:current";

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    session_name: String,
    user: Value,
}

/// The client's current identity and its credential.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub sessid: String,
    pub session_name: String,
    pub user: Entity<User>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.id().is_set() && !self.sessid.is_empty()
    }

    /// `(session_name, sessid)` when both are known.
    pub fn credential(&self) -> Option<(String, String)> {
        if self.session_name.is_empty() || self.sessid.is_empty() {
            return None;
        }
        Some((self.session_name.clone(), self.sessid.clone()))
    }

    /// The session persisted in `store` by an earlier client, provided its
    /// cookie is still live. A record without a live cookie is dropped.
    pub(crate) fn restore(store: &dyn KeyValueStore, cookies: &CookieJar) -> Option<Self> {
        let stored = stored_session(store)?;
        let Some(sessid) = cookies.read(&stored.session_name) else {
            debug!(session_name = %stored.session_name, "session cookie is gone; dropping the record");
            forget_session(store);
            return None;
        };
        let session = Self {
            sessid,
            session_name: stored.session_name,
            user: Entity::from_value(&stored.user),
        };
        debug!(uid = %session.user.id(), "restored session");
        Some(session)
    }
}

/// Shared slot for the current session plus the login/logout guard.
#[derive(Clone, Default)]
pub struct SessionContext {
    slot: Arc<RwLock<Session>>,
    guard: Arc<Mutex<()>>,
}

impl SessionContext {
    pub fn current(&self) -> Session {
        self.slot.read().clone()
    }

    pub fn credential(&self) -> Option<(String, String)> {
        self.slot.read().credential()
    }

    pub fn replace(&self, session: Session) {
        *self.slot.write() = session;
    }

    /// Back to the anonymous placeholder.
    pub fn reset(&self) {
        self.replace(Session::anonymous());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Session operations against the `system` and `user` resources.
pub struct SessionManager<'a> {
    services: &'a Services,
}

impl<'a> SessionManager<'a> {
    pub(crate) fn new(services: &'a Services) -> Self {
        Self { services }
    }

    fn context(&self) -> &SessionContext {
        self.services.session_context()
    }

    pub fn current(&self) -> Session {
        self.context().current()
    }

    /// Handshake with the server; an anonymous session is a valid outcome.
    pub async fn connect(&self) -> Option<Session> {
        let _guard = self.context().guard.lock().await;
        let response = self
            .services
            .api("system")
            .execute(&Target::collection(), "connect", None)
            .await?;

        let mut session = self.context().current();
        let payload = response.get("user").cloned().unwrap_or(Value::Null);
        let incoming = payload.get("uid").and_then(EntityId::from_value);
        if incoming.is_some() && incoming.as_ref() == Some(session.user.id()) {
            session.user.update(&payload);
        } else {
            session.user = Entity::from_value(&payload);
        }
        apply_credential(&mut session, &response);

        debug!(uid = %session.user.id(), "connected");
        self.context().replace(session.clone());
        self.remember(&session);
        Some(session)
    }

    /// Log `user` in with `credentials` and make it the session user.
    ///
    /// Re-logging the current user is answered locally. A different user
    /// is logged out first.
    pub async fn login<'u>(
        &self,
        user: &'u mut Entity<User>,
        credentials: &Credentials,
    ) -> Option<&'u mut Entity<User>> {
        let _guard = self.context().guard.lock().await;

        let current = self.context().current();
        if current.is_authenticated() {
            if current.user.name == credentials.username {
                debug!(name = %credentials.username, "already logged in");
                user.update(&Value::Object(current.user.projection()));
                return Some(user);
            }
            info!(from = %current.user.name, to = %credentials.username, "switching user");
            self.logout_locked().await;
        }

        let payload = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let response = self
            .services
            .api("user")
            .execute(&Target::collection(), "login", Some(&payload))
            .await?;

        let account = response.get("user").unwrap_or(&response);
        if !user.update(account) {
            warn!(name = %credentials.username, "login response carried no usable user");
        }

        let mut session = Session::anonymous();
        apply_credential(&mut session, &response);
        session.user = user.clone();
        session.user.pass.clear();

        info!(uid = %session.user.id(), "logged in");
        self.context().replace(session.clone());
        self.remember(&session);
        Some(user)
    }

    /// Log out. Local state is cleared whatever the server says.
    pub async fn logout(&self) -> Option<Value> {
        let _guard = self.context().guard.lock().await;
        self.logout_locked().await
    }

    async fn logout_locked(&self) -> Option<Value> {
        let previous = self.context().current();
        let response = self
            .services
            .api("user")
            .execute(&Target::collection(), "logout", None)
            .await;
        if response.is_none() {
            warn!("logout request failed; clearing the session anyway");
        }
        self.context().reset();

        let store = self.services.store().as_ref();
        let name = Some(previous.session_name)
            .filter(|name| !name.is_empty())
            .or_else(|| stored_session(store).map(|stored| stored.session_name));
        if let Some(name) = name {
            self.services.cookies().remove(&name);
        }
        forget_session(store);
        response
    }

    /// Create an account. The new user is not logged in.
    pub async fn register<'u>(&self, user: &'u mut Entity<User>) -> Option<&'u mut Entity<User>> {
        let payload = user.write_payload();
        let response = self
            .services
            .api("user")
            .execute(&Target::collection(), "register", Some(&payload))
            .await?;
        user.update(&response);
        Some(user)
    }

    /// Remote variable. `default` is resolved by the server.
    pub async fn get_variable(&self, name: &str, default: Value) -> Option<Value> {
        self.system_action("get_variable", json!({"name": name, "default": default}))
            .await
    }

    pub async fn set_variable(&self, name: &str, value: Value) -> Option<Value> {
        self.system_action("set_variable", json!({"name": name, "value": value}))
            .await
    }

    pub async fn del_variable(&self, name: &str) -> Option<Value> {
        self.system_action("del_variable", json!({"name": name})).await
    }

    async fn system_action(&self, action: &str, payload: Value) -> Option<Value> {
        self.services
            .api("system")
            .execute(&Target::collection(), action, Some(&payload))
            .await
    }

    /// Persist the session cookie and record once an identified user
    /// holds it. An anonymous outcome drops whatever was persisted.
    fn remember(&self, session: &Session) {
        let store = self.services.store().as_ref();
        let Some((name, sessid)) = session.credential().filter(|_| session.user.id().is_set()) else {
            if !session.session_name.is_empty() {
                self.services.cookies().remove(&session.session_name);
            }
            forget_session(store);
            return;
        };

        self.services
            .cookies()
            .write(&name, &sessid, &self.services.config().cookie);

        let mut user = session.user.projection();
        user.remove("pass");
        let record = StoredSession {
            session_name: name,
            user: Value::Object(user),
        };
        match serde_json::to_string(&record) {
            Ok(raw) => {
                if let Err(e) = store.set(SESSION_KEY, &raw) {
                    warn!(error = %e, "failed to persist session record");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode session record"),
        }
    }
}

fn stored_session(store: &dyn KeyValueStore) -> Option<StoredSession> {
    let raw = store.get(SESSION_KEY)?;
    match serde_json::from_str(&raw) {
        Ok(stored) => Some(stored),
        Err(e) => {
            warn!(error = %e, "discarding unreadable session record");
            forget_session(store);
            None
        }
    }
}

fn forget_session(store: &dyn KeyValueStore) {
    if let Err(e) = store.remove(SESSION_KEY) {
        warn!(error = %e, "failed to remove session record");
    }
}

fn apply_credential(session: &mut Session, response: &Value) {
    if let Some(sessid) = response.get("sessid").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        session.sessid = sessid.to_string();
    }
    if let Some(name) = response
        .get("session_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        session.session_name = name.to_string();
    }
}

#[async_trait]
impl Loadable for Session {
    async fn load<'a>(&'a mut self, services: &'a Services) -> Option<Loaded<'a, Self>> {
        *self = services.session().connect().await?;
        Some(Loaded::Single(self))
    }
}

impl Entity<User> {
    /// Log in with this user's name and password.
    pub async fn login(&mut self, services: &Services) -> Option<&mut Self> {
        let credentials = Credentials::new(&self.name, &self.pass);
        services.session().login(self, &credentials).await
    }

    pub async fn logout(&self, services: &Services) -> Option<Value> {
        services.session().logout().await
    }

    pub async fn register(&mut self, services: &Services) -> Option<&mut Self> {
        services.session().register(self).await
    }
}
