//! Verify request building and response parsing against JSON test vectors
//! stored in `test-vectors/`.
//!
//! Request bodies are compared as parsed JSON, not raw strings, so key
//! order does not matter.

use drupal_services::{ApiError, HttpMethod, HttpResponse, Query, ResponseEncoding, ServicesClient, Target};
use serde_json::Value;

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn parse_encoding(s: &str) -> ResponseEncoding {
    match s {
        "json" => ResponseEncoding::Json,
        "jsonp" => ResponseEncoding::Jsonp,
        other => panic!("unknown encoding: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn request_test_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let endpoint = vectors["endpoint"].as_str().unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let client = ServicesClient::new(endpoint, case["resource"].as_str().unwrap());
        let target = Target {
            id: case["target"]["id"].as_str(),
            uri: case["target"]["uri"].as_str(),
        };
        let query: Query = case["query"]
            .as_object()
            .map(|q| {
                q.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let payload = case.get("payload");

        let req = match case["operation"].as_str().unwrap() {
            "get" => client.build_get(&target, None, &query),
            "save" => client.build_save(&target, payload.unwrap()).unwrap(),
            "action" => client
                .build_action(&target, case["action"].as_str().unwrap(), payload)
                .unwrap(),
            "remove" => client.build_remove(&target),
            other => panic!("{name}: unknown operation {other}"),
        };

        let expected = &case["expected_request"];
        assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(
            req.path,
            format!("{endpoint}{}", expected["path"].as_str().unwrap()),
            "{name}: path"
        );

        let expected_headers: Vec<(String, String)> = expected["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let pair = h.as_array().unwrap();
                (pair[0].as_str().unwrap().to_string(), pair[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");

        let body: Value = req
            .body
            .as_deref()
            .map(|b| serde_json::from_str(b).unwrap())
            .unwrap_or(Value::Null);
        assert_eq!(body, expected["body"], "{name}: body");
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[test]
fn response_test_vectors() {
    let raw = include_str!("../../test-vectors/responses.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let response = HttpResponse {
            status: case["response"]["status"].as_u64().unwrap() as u16,
            headers: Vec::new(),
            body: case["response"]["body"].as_str().unwrap().to_string(),
        };
        let encoding = parse_encoding(case["encoding"].as_str().unwrap());
        let result = ServicesClient::parse_response(response, encoding);

        match case["expected_error"].as_str() {
            None => assert_eq!(result.unwrap(), case["expected"], "{name}"),
            Some("not_found") => assert!(matches!(result, Err(ApiError::NotFound)), "{name}"),
            Some("http") => assert!(matches!(result, Err(ApiError::Http { .. })), "{name}"),
            Some("deserialization") => {
                assert!(matches!(result, Err(ApiError::Deserialization(_))), "{name}")
            }
            Some(other) => panic!("{name}: unknown error kind {other}"),
        }
    }
}
