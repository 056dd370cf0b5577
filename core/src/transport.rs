//! Executing `HttpRequest` values.
//!
//! `Transport` is the only place the client suspends. `HttpTransport`
//! talks to a real server through reqwest; `RecordingTransport` answers
//! from a script and keeps every request it saw, which is how the
//! lifecycle rules are exercised without a network.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Performs one HTTP round-trip.
///
/// Non-2xx statuses are data, not errors: they come back as an
/// `HttpResponse` and are interpreted by `ServicesClient::parse_response`.
/// `Err` is reserved for requests that never got an answer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// Receives the process-wide "request in flight" toggle.
pub trait LoadingIndicator: Send + Sync {
    fn set_loading(&self, loading: bool);
}

/// `Transport` over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.http.request(method, &request.path);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse { status, headers, body })
    }
}

struct Route {
    method: HttpMethod,
    path: String,
    responses: VecDeque<HttpResponse>,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        if self.method != request.method {
            return false;
        }
        let bare = request.path.split('?').next().unwrap_or_default();
        self.path == request.path || self.path == bare
    }
}

/// Scripted transport that records every request.
///
/// Responses are registered per method and path; a path without a query
/// string matches requests with any query. Queued responses are consumed
/// in order and the last one repeats. Unmatched requests get a 404.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `method path`.
    pub fn respond(&self, method: HttpMethod, path: &str, response: HttpResponse) -> &Self {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// Queue a 200 response carrying `body` as JSON.
    pub fn respond_json(&self, method: HttpMethod, path: &str, body: Value) -> &Self {
        self.respond(method, path, HttpResponse::ok(body.to_string()))
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose method and bare path match.
    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path.split('?').next() == Some(path))
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().push(request.clone());
        let mut routes = self.routes.lock();
        let response = routes
            .iter_mut()
            .find(|r| r.matches(&request))
            .and_then(|route| {
                if route.responses.len() > 1 {
                    route.responses.pop_front()
                } else {
                    route.responses.front().cloned()
                }
            });
        Ok(response.unwrap_or_else(|| HttpResponse::status(404)))
    }
}
