//! The client context: configuration, transport, persistence and session.
//!
//! # Design
//! `Services` is built once and passed by reference to every lifecycle
//! operation. It owns the only shared mutable state, the session slot,
//! which is read on every outgoing request to attach the credential.
//!
//! `Api` is a resource-bound view over `Services`: it builds requests with
//! `ServicesClient`, runs them through `Services::dispatch`, and applies
//! the read-through response cache when that strategy is active.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{url_key, CacheStrategy, Clock, EntityCache, EntityLayout, ResponseCache, SystemClock};
use crate::client::ServicesClient;
use crate::config::ServicesConfig;
use crate::cookie::CookieJar;
use crate::http::{HttpMethod, HttpRequest, ResponseEncoding};
use crate::locator::Locate;
use crate::query::Query;
use crate::session::{Session, SessionContext, SessionManager};
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::{HttpTransport, LoadingIndicator, Transport};

pub struct Services {
    config: ServicesConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
    cookies: CookieJar,
    response_cache: Option<ResponseCache>,
    entity_cache: Option<EntityCache>,
    session: SessionContext,
    loading: Option<Arc<dyn LoadingIndicator>>,
}

/// Wires the collaborators of a `Services` instance.
pub struct ServicesBuilder {
    config: ServicesConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    loading: Option<Arc<dyn LoadingIndicator>>,
}

impl ServicesBuilder {
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn loading_indicator(mut self, indicator: Arc<dyn LoadingIndicator>) -> Self {
        self.loading = Some(indicator);
        self
    }

    pub fn build(self) -> Services {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ttl = self.config.cache_ttl_secs;

        let (response_cache, entity_cache) = match self.config.cache {
            CacheStrategy::Disabled => (None, None),
            CacheStrategy::Response => (Some(ResponseCache::new(store.clone(), clock.clone(), ttl)), None),
            CacheStrategy::WholeObject => (
                None,
                Some(EntityCache::new(store.clone(), clock.clone(), ttl, EntityLayout::WholeObject)),
            ),
            CacheStrategy::PerField => (
                None,
                Some(EntityCache::new(store.clone(), clock.clone(), ttl, EntityLayout::PerField)),
            ),
        };

        let cookies = CookieJar::new(store.clone(), clock);
        let session = SessionContext::default();
        if let Some(restored) = Session::restore(store.as_ref(), &cookies) {
            session.replace(restored);
        }

        Services {
            transport: self.transport.unwrap_or_else(|| Arc::new(HttpTransport::new())),
            store,
            cookies,
            response_cache,
            entity_cache,
            session,
            loading: self.loading,
            config: self.config,
        }
    }
}

impl Services {
    /// Services over HTTP with in-memory persistence.
    pub fn new(config: ServicesConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ServicesConfig) -> ServicesBuilder {
        ServicesBuilder {
            config,
            transport: None,
            store: None,
            clock: None,
            loading: None,
        }
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.session
    }

    pub fn response_cache(&self) -> Option<&ResponseCache> {
        self.response_cache.as_ref()
    }

    pub fn entity_cache(&self) -> Option<&EntityCache> {
        self.entity_cache.as_ref()
    }

    /// Request view bound to `resource`.
    pub fn api(&self, resource: &str) -> Api<'_> {
        Api {
            services: self,
            client: ServicesClient::new(&self.config.endpoint, resource),
        }
    }

    /// Connect/login/logout/register and the system variables.
    pub fn session(&self) -> SessionManager<'_> {
        SessionManager::new(self)
    }

    /// One round-trip to an arbitrary URL.
    ///
    /// `payload` is ignored for GET and DELETE.
    pub async fn call(
        &self,
        url: &str,
        encoding: ResponseEncoding,
        method: HttpMethod,
        payload: Option<&Value>,
    ) -> Option<Value> {
        let mut request = HttpRequest {
            method,
            path: url.to_string(),
            headers: Vec::new(),
            body: None,
            encoding,
        };
        if matches!(method, HttpMethod::Post | HttpMethod::Put) {
            if let Some(payload) = payload {
                request.body = Some(payload.to_string());
                request
                    .headers
                    .push(("content-type".to_string(), "application/json".to_string()));
            }
        }
        self.dispatch(request).await
    }

    /// Attach credentials, execute and decode. Every failure is logged and
    /// becomes `None`.
    pub async fn dispatch(&self, mut request: HttpRequest) -> Option<Value> {
        if let Some(cookie) = self.cookie_header() {
            request.headers.push(("cookie".to_string(), cookie));
        }
        let method = request.method;
        let path = request.path.clone();
        let encoding = request.encoding;
        debug!(%method, %path, "dispatching request");

        self.set_loading(true);
        let result = self.transport.execute(request).await;
        self.set_loading(false);

        match result.and_then(|response| ServicesClient::parse_response(response, encoding)) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%method, %path, error = %e, "request failed");
                None
            }
        }
    }

    /// Stored cookies, with the live session credential taking precedence.
    fn cookie_header(&self) -> Option<String> {
        let credential = self.session.credential();
        self.cookies
            .header_with(credential.as_ref().map(|(name, sessid)| (name.as_str(), sessid.as_str())))
    }

    fn set_loading(&self, loading: bool) {
        if let Some(indicator) = &self.loading {
            indicator.set_loading(loading);
        }
    }
}

/// `Services` bound to one resource type.
pub struct Api<'a> {
    services: &'a Services,
    client: ServicesClient,
}

impl Api<'_> {
    pub fn client(&self) -> &ServicesClient {
        &self.client
    }

    pub fn get_url(&self, target: &impl Locate) -> String {
        self.client.get_url(target)
    }

    /// Read `target`, consulting the response cache first when enabled.
    pub async fn get(&self, target: &(impl Locate + Sync), sub: Option<&str>, query: &Query) -> Option<Value> {
        let request = self.client.build_get(target, sub, query);
        let Some(cache) = self.services.response_cache() else {
            return self.services.dispatch(request).await;
        };

        let url = request.path.clone();
        let key = url_key(&url);
        if let Some(hit) = cache.get(&key, &url) {
            debug!(%url, "served from response cache");
            return Some(hit);
        }
        let value = self.services.dispatch(request).await?;
        cache.put(&key, &url, &value);
        Some(value)
    }

    /// `POST {url}/{action}`.
    pub async fn execute(&self, target: &(impl Locate + Sync), action: &str, payload: Option<&Value>) -> Option<Value> {
        match self.client.build_action(target, action, payload) {
            Ok(request) => self.services.dispatch(request).await,
            Err(e) => {
                warn!(action, error = %e, "failed to build action request");
                None
            }
        }
    }

    /// Create (POST) or update (PUT) depending on whether `target` has an id.
    /// The cached read of `target` is invalidated first.
    pub async fn save(&self, target: &(impl Locate + Sync), payload: &Value) -> Option<Value> {
        self.invalidate(target);
        match self.client.build_save(target, payload) {
            Ok(request) => self.services.dispatch(request).await,
            Err(e) => {
                warn!(error = %e, "failed to build save request");
                None
            }
        }
    }

    /// Invalidate the cached read of `target`, then DELETE it.
    pub async fn remove(&self, target: &(impl Locate + Sync)) -> Option<Value> {
        self.invalidate(target);
        let request = self.client.build_remove(target);
        self.services.dispatch(request).await
    }

    /// Drop the response-cache entry of a bare read of `target`.
    fn invalidate(&self, target: &impl Locate) {
        if let Some(cache) = self.services.response_cache() {
            let read = self.client.build_get(target, None, &Query::new());
            cache.invalidate(&url_key(&read.path));
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(ServicesConfig::default())
    }
}
