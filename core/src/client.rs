//! Stateless HTTP request builder and response parser for one resource.
//!
//! # Design
//! `ServicesClient` holds only a `ResourceLocator` and carries no mutable
//! state between calls. Each wire operation is a `build_*` method that
//! produces an `HttpRequest`; `parse_response` consumes the matching
//! `HttpResponse`. Credential attachment and the round-trip itself live in
//! `Services`, keeping this layer deterministic.

use serde_json::Value;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, ResponseEncoding};
use crate::locator::{Locate, ResourceLocator};
use crate::query::Query;

/// Builds requests against `{endpoint}/{resource}` and decodes responses.
#[derive(Debug, Clone)]
pub struct ServicesClient {
    locator: ResourceLocator,
}

impl ServicesClient {
    pub fn new(endpoint: &str, resource: &str) -> Self {
        Self {
            locator: ResourceLocator::new(endpoint, resource),
        }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn get_url(&self, target: &impl Locate) -> String {
        self.locator.get_url(target)
    }

    /// `GET {url}[/{sub}].jsonp[?query]`.
    pub fn build_get(&self, target: &impl Locate, sub: Option<&str>, query: &Query) -> HttpRequest {
        let mut path = self.get_url(target);
        if let Some(sub) = sub.filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(sub);
        }
        path.push_str(ResponseEncoding::Jsonp.suffix());
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query.to_query_string());
        }
        HttpRequest {
            method: HttpMethod::Get,
            path,
            headers: Vec::new(),
            body: None,
            encoding: ResponseEncoding::Jsonp,
        }
    }

    /// `POST {url}/{action}.json` with an optional JSON body.
    pub fn build_action(
        &self,
        target: &impl Locate,
        action: &str,
        payload: Option<&Value>,
    ) -> Result<HttpRequest, ApiError> {
        let path = format!(
            "{}/{action}{}",
            self.get_url(target),
            ResponseEncoding::Json.suffix()
        );
        json_request(HttpMethod::Post, path, payload)
    }

    /// `PUT {url}.json` when the target has an id, otherwise `POST`.
    pub fn build_save(&self, target: &impl Locate, payload: &Value) -> Result<HttpRequest, ApiError> {
        let method = if target.locate_id().is_some() {
            HttpMethod::Put
        } else {
            HttpMethod::Post
        };
        let path = format!("{}{}", self.get_url(target), ResponseEncoding::Json.suffix());
        json_request(method, path, Some(payload))
    }

    /// `DELETE {url}.json`.
    pub fn build_remove(&self, target: &impl Locate) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Delete,
            path: format!("{}{}", self.get_url(target), ResponseEncoding::Json.suffix()),
            headers: Vec::new(),
            body: None,
            encoding: ResponseEncoding::Json,
        }
    }

    /// Decode a 2xx response body; JSONP padding is stripped first.
    pub fn parse_response(response: HttpResponse, encoding: ResponseEncoding) -> Result<Value, ApiError> {
        check_status(&response)?;
        let body = match encoding {
            ResponseEncoding::Json => response.body.trim(),
            ResponseEncoding::Jsonp => strip_padding(&response.body),
        };
        serde_json::from_str(body).map_err(|e| ApiError::Deserialization(e.to_string()))
    }
}

fn json_request(method: HttpMethod, path: String, payload: Option<&Value>) -> Result<HttpRequest, ApiError> {
    let (headers, body) = match payload {
        Some(payload) => {
            let body = serde_json::to_string(payload).map_err(|e| ApiError::Serialization(e.to_string()))?;
            (
                vec![("content-type".to_string(), "application/json".to_string())],
                Some(body),
            )
        }
        None => (Vec::new(), None),
    };
    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
        encoding: ResponseEncoding::Json,
    })
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if (200..300).contains(&response.status) {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::Http {
        status: response.status,
        body: response.body.clone(),
    })
}

/// `cb({"a":1});` -> `{"a":1}`. Bodies without padding pass through.
fn strip_padding(body: &str) -> &str {
    let body = body.trim();
    let Some(open) = body.find('(') else {
        return body;
    };
    let name = &body[..open];
    let is_callback = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !is_callback {
        return body;
    }
    let inner = body[open + 1..].trim_end().trim_end_matches(';').trim_end();
    inner.strip_suffix(')').unwrap_or(inner)
}
