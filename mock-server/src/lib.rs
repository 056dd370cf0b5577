//! In-memory emulation of a Drupal Services REST endpoint.
//!
//! Serves the `node`, `user` and `system` resources under `/rest`, with the
//! `.json` / `.jsonp` format suffixes the real endpoint uses. Sessions are
//! tracked by a `SESS…` cookie. A `callback` query parameter on a read wraps
//! the JSON body in JSONP padding.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_NAME: &str = "SESSmock";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub nid: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub uid: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub uid: String,
    pub name: String,
    pub mail: String,
    pub status: String,
    #[serde(skip_serializing, default)]
    pub pass: String,
}

impl Account {
    fn anonymous() -> Self {
        Self {
            uid: "0".to_string(),
            name: String::new(),
            mail: String::new(),
            status: "0".to_string(),
            pass: String::new(),
        }
    }
}

/// Fields accepted on node create/update. Scalars may arrive as numbers.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeInput {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<Value>,
    pub uid: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub name: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(Debug, Deserialize)]
pub struct VariableInput {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub default: Value,
}

#[derive(Debug, Default)]
pub struct Site {
    nodes: BTreeMap<u64, Node>,
    users: BTreeMap<u64, Account>,
    sessions: HashMap<String, u64>,
    variables: HashMap<String, Value>,
}

impl Site {
    /// A site with one administrator account (`admin` / `admin`).
    pub fn seeded() -> Self {
        let mut site = Self::default();
        site.users.insert(
            1,
            Account {
                uid: "1".to_string(),
                name: "admin".to_string(),
                mail: "admin@example.com".to_string(),
                status: "1".to_string(),
                pass: "admin".to_string(),
            },
        );
        site
    }

    fn next_nid(&self) -> u64 {
        self.nodes.keys().next_back().map_or(1, |n| n + 1)
    }

    fn next_uid(&self) -> u64 {
        self.users.keys().next_back().map_or(1, |n| n + 1)
    }

    fn session_user(&self, headers: &HeaderMap) -> Option<(String, &Account)> {
        let sessid = session_cookie(headers)?;
        let uid = self.sessions.get(&sessid)?;
        let account = self.users.get(uid)?;
        Some((sessid, account))
    }
}

pub type Db = Arc<RwLock<Site>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Site::seeded()));
    Router::new()
        .route("/rest/node.jsonp", get(list_nodes))
        .route("/rest/node.json", get(list_nodes).post(create_node))
        .route("/rest/node/{file}", get(get_node).put(update_node).delete(delete_node))
        .route("/rest/user.jsonp", get(list_users))
        .route("/rest/user.json", get(list_users))
        .route("/rest/user/{file}", get(get_user).post(user_action))
        .route("/rest/system/{file}", post(system_action))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

type Params = Query<HashMap<String, String>>;

/// `"42.json"` -> `"42"`.
fn strip_format(file: &str) -> &str {
    file.strip_suffix(".jsonp")
        .or_else(|| file.strip_suffix(".json"))
        .unwrap_or(file)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_NAME)
        .map(|(_, value)| value.to_string())
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}/rest")
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(String::from(if *b { "1" } else { "0" })),
        _ => None,
    }
}

/// JSON, or JSONP when a `callback` parameter was given.
fn reply(status: StatusCode, body: Value, params: &HashMap<String, String>) -> Response {
    match params.get("callback").filter(|cb| !cb.is_empty()) {
        Some(callback) => (
            status,
            [(header::CONTENT_TYPE, "application/javascript")],
            format!("{callback}({body});"),
        )
            .into_response(),
        None => (status, Json(body)).into_response(),
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!([message]))).into_response()
}

/// Filters of the form `parameters[field]=value`.
fn filters(params: &HashMap<String, String>) -> Vec<(&str, &str)> {
    params
        .iter()
        .filter_map(|(k, v)| {
            let field = k.strip_prefix("parameters[")?.strip_suffix(']')?;
            Some((field, v.as_str()))
        })
        .collect()
}

fn matches(record: &Value, filters: &[(&str, &str)]) -> bool {
    filters
        .iter()
        .all(|(field, want)| record.get(*field).and_then(scalar).as_deref() == Some(*want))
}

fn to_value<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

async fn list_nodes(State(db): State<Db>, Query(params): Params) -> Response {
    let site = db.read().await;
    let wanted = filters(&params);
    let nodes: Vec<Value> = site
        .nodes
        .values()
        .map(to_value)
        .filter(|n| matches(n, &wanted))
        .collect();
    reply(StatusCode::OK, Value::Array(nodes), &params)
}

async fn get_node(State(db): State<Db>, Path(file): Path<String>, Query(params): Params) -> Response {
    let site = db.read().await;
    let Ok(nid) = strip_format(&file).parse::<u64>() else {
        return error(StatusCode::NOT_FOUND, "Node not found");
    };
    match site.nodes.get(&nid) {
        Some(node) => reply(StatusCode::OK, to_value(node), &params),
        None => error(StatusCode::NOT_FOUND, "Node not found"),
    }
}

async fn create_node(State(db): State<Db>, headers: HeaderMap, Json(input): Json<NodeInput>) -> Response {
    let mut site = db.write().await;
    let author = site.session_user(&headers).map(|(_, a)| a.uid.clone());
    let nid = site.next_nid();
    let node = Node {
        nid: nid.to_string(),
        title: input.title.unwrap_or_default(),
        kind: input.kind.unwrap_or_else(|| "page".to_string()),
        status: input.status.as_ref().and_then(scalar).unwrap_or_else(|| "1".to_string()),
        uid: author
            .or_else(|| input.uid.as_ref().and_then(scalar).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "0".to_string()),
    };
    info!(nid, title = %node.title, "node created");
    let mut body = to_value(&node);
    body["uri"] = Value::String(format!("{}/node/{nid}", base_url(&headers)));
    site.nodes.insert(nid, node);
    (StatusCode::OK, Json(body)).into_response()
}

async fn update_node(State(db): State<Db>, Path(file): Path<String>, Json(input): Json<NodeInput>) -> Response {
    let mut site = db.write().await;
    let Ok(nid) = strip_format(&file).parse::<u64>() else {
        return error(StatusCode::NOT_FOUND, "Node not found");
    };
    let Some(node) = site.nodes.get_mut(&nid) else {
        return error(StatusCode::NOT_FOUND, "Node not found");
    };
    if let Some(title) = input.title {
        node.title = title;
    }
    if let Some(kind) = input.kind {
        node.kind = kind;
    }
    if let Some(status) = input.status.as_ref().and_then(scalar) {
        node.status = status;
    }
    if let Some(uid) = input.uid.as_ref().and_then(scalar).filter(|u| !u.is_empty()) {
        node.uid = uid;
    }
    (StatusCode::OK, Json(to_value(node))).into_response()
}

async fn delete_node(State(db): State<Db>, Path(file): Path<String>) -> Response {
    let mut site = db.write().await;
    let removed = strip_format(&file)
        .parse::<u64>()
        .ok()
        .and_then(|nid| site.nodes.remove(&nid));
    match removed {
        Some(node) => {
            info!(nid = %node.nid, "node deleted");
            (StatusCode::OK, Json(json!([true]))).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "Node not found"),
    }
}

async fn list_users(State(db): State<Db>, Query(params): Params) -> Response {
    let site = db.read().await;
    let wanted = filters(&params);
    let users: Vec<Value> = site
        .users
        .values()
        .map(to_value)
        .filter(|u| matches(u, &wanted))
        .collect();
    reply(StatusCode::OK, Value::Array(users), &params)
}

async fn get_user(State(db): State<Db>, Path(file): Path<String>, Query(params): Params) -> Response {
    let site = db.read().await;
    let Some(account) = strip_format(&file)
        .parse::<u64>()
        .ok()
        .and_then(|uid| site.users.get(&uid))
    else {
        return error(StatusCode::NOT_FOUND, "User not found");
    };
    reply(StatusCode::OK, to_value(account), &params)
}

async fn user_action(
    State(db): State<Db>,
    Path(file): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut site = db.write().await;
    match strip_format(&file) {
        "login" => {
            let Ok(input) = serde_json::from_value::<LoginInput>(payload) else {
                return error(StatusCode::NOT_ACCEPTABLE, "Missing credentials");
            };
            let Some(account) = site
                .users
                .values()
                .find(|a| a.name == input.username && a.pass == input.password)
                .cloned()
            else {
                return error(StatusCode::UNAUTHORIZED, "Wrong username or password.");
            };
            let sessid = Uuid::new_v4().simple().to_string();
            let uid = account.uid.parse().unwrap_or_default();
            site.sessions.insert(sessid.clone(), uid);
            info!(name = %account.name, "user logged in");
            Json(json!({
                "sessid": sessid,
                "session_name": SESSION_NAME,
                "user": account,
            }))
            .into_response()
        }
        "logout" => {
            let Some(sessid) = site.session_user(&headers).map(|(sessid, _)| sessid) else {
                return error(StatusCode::NOT_ACCEPTABLE, "User is not logged in.");
            };
            site.sessions.remove(&sessid);
            Json(json!([true])).into_response()
        }
        "register" => {
            let Ok(input) = serde_json::from_value::<RegisterInput>(payload) else {
                return error(StatusCode::NOT_ACCEPTABLE, "Missing account fields");
            };
            if input.name.is_empty() || site.users.values().any(|a| a.name == input.name) {
                return error(StatusCode::NOT_ACCEPTABLE, "The name is already taken.");
            }
            let uid = site.next_uid();
            site.users.insert(
                uid,
                Account {
                    uid: uid.to_string(),
                    name: input.name,
                    mail: input.mail,
                    status: "1".to_string(),
                    pass: input.pass,
                },
            );
            Json(json!({
                "uid": uid.to_string(),
                "uri": format!("{}/user/{uid}", base_url(&headers)),
            }))
            .into_response()
        }
        other => {
            debug!(action = other, "unknown user action");
            error(StatusCode::NOT_FOUND, "Unknown action")
        }
    }
}

async fn system_action(
    State(db): State<Db>,
    Path(file): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut site = db.write().await;
    match strip_format(&file) {
        "connect" => {
            let (sessid, account) = match site.session_user(&headers) {
                Some((sessid, account)) => (sessid, account.clone()),
                None => (Uuid::new_v4().simple().to_string(), Account::anonymous()),
            };
            Json(json!({
                "sessid": sessid,
                "session_name": SESSION_NAME,
                "user": account,
            }))
            .into_response()
        }
        "get_variable" => {
            let Ok(input) = serde_json::from_value::<VariableInput>(payload) else {
                return error(StatusCode::NOT_ACCEPTABLE, "Missing variable name");
            };
            let value = site.variables.get(&input.name).cloned().unwrap_or(input.default);
            Json(value).into_response()
        }
        "set_variable" => {
            let Ok(input) = serde_json::from_value::<VariableInput>(payload) else {
                return error(StatusCode::NOT_ACCEPTABLE, "Missing variable name");
            };
            site.variables.insert(input.name, input.value);
            Json(json!(true)).into_response()
        }
        "del_variable" => {
            let Ok(input) = serde_json::from_value::<VariableInput>(payload) else {
                return error(StatusCode::NOT_ACCEPTABLE, "Missing variable name");
            };
            site.variables.remove(&input.name);
            Json(json!(true)).into_response()
        }
        other => {
            debug!(action = other, "unknown system action");
            error(StatusCode::NOT_FOUND, "Unknown action")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strip_format_handles_both_suffixes() {
        assert_eq!(strip_format("42.json"), "42");
        assert_eq!(strip_format("42.jsonp"), "42");
        assert_eq!(strip_format("connect"), "connect");
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("has_js=1; SESSmock=abc; other=2"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn filters_only_read_nested_parameters() {
        let params = HashMap::from([
            ("parameters[type]".to_string(), "page".to_string()),
            ("title".to_string(), "Hello".to_string()),
        ]);
        assert_eq!(filters(&params), vec![("type", "page")]);
    }

    #[test]
    fn password_is_never_serialized() {
        let site = Site::seeded();
        let admin = to_value(&site.users[&1]);
        assert_eq!(admin["name"], "admin");
        assert!(admin.get("pass").is_none());
    }

    #[test]
    fn node_input_accepts_numeric_scalars() {
        let input: NodeInput = serde_json::from_str(r#"{"title":"T","status":1,"uid":"3"}"#).unwrap();
        assert_eq!(input.status.as_ref().and_then(scalar).as_deref(), Some("1"));
        assert_eq!(input.uid.as_ref().and_then(scalar).as_deref(), Some("3"));
    }
}
