use axum::http::{self, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mock_server::{app, Account, Node, SESSION_NAME};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn with_session(mut request: Request<String>, sessid: &str) -> Request<String> {
    request.headers_mut().insert(
        http::header::COOKIE,
        format!("{SESSION_NAME}={sessid}").parse().unwrap(),
    );
    request
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let body = json!({"username": username, "password": password}).to_string();
    let resp = app
        .clone()
        .oneshot(json_request("POST", "/rest/user/login.json", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let session: Value = body_json(resp).await;
    session["sessid"].as_str().unwrap().to_string()
}

// --- node ---

#[tokio::test]
async fn list_nodes_empty() {
    let resp = app().oneshot(get("/rest/node.jsonp")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let nodes: Vec<Node> = body_json(resp).await;
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn create_node_returns_node_with_uri() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/rest/node.json",
            r#"{"title":"Hello","type":"page","status":1}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let node: Value = body_json(resp).await;
    assert_eq!(node["nid"], "1");
    assert_eq!(node["title"], "Hello");
    assert_eq!(node["status"], "1");
    assert_eq!(node["uri"], "http://localhost/rest/node/1");
}

#[tokio::test]
async fn get_node_not_found() {
    let resp = app().oneshot(get("/rest/node/99.jsonp")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_node_not_found() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/rest/node/99.json")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn jsonp_callback_pads_the_body() {
    let resp = app().oneshot(get("/rest/node.jsonp?callback=cb")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
        "application/javascript"
    );
    assert_eq!(body_bytes(resp).await.as_ref(), b"cb([]);");
}

#[tokio::test]
async fn node_lifecycle() {
    let app = app();

    // Create
    let resp = app
        .clone()
        .oneshot(json_request("POST", "/rest/node.json", r#"{"title":"Draft","type":"article"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: Value = body_json(resp).await;
    let nid = created["nid"].as_str().unwrap().to_string();

    // Filtered list
    let resp = app
        .clone()
        .oneshot(get("/rest/node.jsonp?parameters[type]=article"))
        .await
        .unwrap();
    let nodes: Vec<Node> = body_json(resp).await;
    assert_eq!(nodes.len(), 1);
    let resp = app
        .clone()
        .oneshot(get("/rest/node.jsonp?parameters[type]=page"))
        .await
        .unwrap();
    let nodes: Vec<Node> = body_json(resp).await;
    assert!(nodes.is_empty());

    // Update
    let resp = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/rest/node/{nid}.json"),
            r#"{"title":"Published","status":"1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Node = body_json(resp).await;
    assert_eq!(updated.title, "Published");
    assert_eq!(updated.kind, "article");

    // Read
    let resp = app
        .clone()
        .oneshot(get(&format!("/rest/node/{nid}.jsonp")))
        .await
        .unwrap();
    let fetched: Node = body_json(resp).await;
    assert_eq!(fetched.title, "Published");

    // Delete
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rest/node/{nid}.json"))
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ack: Value = body_json(resp).await;
    assert_eq!(ack, json!([true]));

    let resp = app
        .oneshot(get(&format!("/rest/node/{nid}.jsonp")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- user ---

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/rest/user/login.json",
            r#"{"username":"admin","password":"nope"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_connect_logout() {
    let app = app();
    let sessid = login(&app, "admin", "admin").await;

    let resp = app
        .clone()
        .oneshot(with_session(json_request("POST", "/rest/system/connect.json", ""), &sessid))
        .await
        .unwrap();
    let connected: Value = body_json(resp).await;
    assert_eq!(connected["sessid"], sessid.as_str());
    assert_eq!(connected["user"]["name"], "admin");
    assert!(connected["user"].get("pass").is_none());

    let resp = app
        .clone()
        .oneshot(with_session(json_request("POST", "/rest/user/logout.json", ""), &sessid))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(with_session(json_request("POST", "/rest/system/connect.json", ""), &sessid))
        .await
        .unwrap();
    let connected: Value = body_json(resp).await;
    assert_eq!(connected["user"]["uid"], "0");

    let resp = app
        .oneshot(json_request("POST", "/rest/user/logout.json", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn register_then_find_by_name() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/rest/user/register.json",
            r#"{"name":"bob","mail":"bob@example.com","pass":"pw"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: Value = body_json(resp).await;
    assert_eq!(created["uid"], "2");

    let resp = app
        .clone()
        .oneshot(get("/rest/user.jsonp?parameters[name]=bob"))
        .await
        .unwrap();
    let users: Vec<Account> = body_json(resp).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].mail, "bob@example.com");

    let resp = app
        .oneshot(json_request(
            "POST",
            "/rest/user/register.json",
            r#"{"name":"bob","mail":"other@example.com","pass":"pw"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
}

// --- system ---

#[tokio::test]
async fn variables_round_trip_and_default() {
    let app = app();

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/rest/system/get_variable.json",
            r#"{"name":"site_name","default":"fallback"}"#,
        ))
        .await
        .unwrap();
    let value: Value = body_json(resp).await;
    assert_eq!(value, json!("fallback"));

    app.clone()
        .oneshot(json_request(
            "POST",
            "/rest/system/set_variable.json",
            r#"{"name":"site_name","value":"Mock"}"#,
        ))
        .await
        .unwrap();
    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/rest/system/get_variable.json",
            r#"{"name":"site_name","default":"fallback"}"#,
        ))
        .await
        .unwrap();
    let value: Value = body_json(resp).await;
    assert_eq!(value, json!("Mock"));

    app.clone()
        .oneshot(json_request(
            "POST",
            "/rest/system/del_variable.json",
            r#"{"name":"site_name"}"#,
        ))
        .await
        .unwrap();
    let resp = app
        .oneshot(json_request(
            "POST",
            "/rest/system/get_variable.json",
            r#"{"name":"site_name"}"#,
        ))
        .await
        .unwrap();
    let value: Value = body_json(resp).await;
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn unknown_system_action_is_not_found() {
    let resp = app()
        .oneshot(json_request("POST", "/rest/system/reboot.json", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
