//! HTTP routes driven through the router without a listener.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::Harness;
use push_relay::api::{AppState, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn call(h: &Harness, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let router = build_router(AppState::new(h.ctx.clone()));
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_version() {
    let h = Harness::new();
    let (status, body) = call(&h, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = call(&h, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn register_and_unregister_resident_token() {
    let h = Harness::new();
    let resident = "organizations/org1/properties/p1/residents/r1";
    h.put(resident, json!({ "fcmTokens": ["existing"] })).await;

    let request = json!({
        "scope": {
            "kind": "resident",
            "orgId": "org1",
            "propertyId": "p1",
            "residentId": "r1"
        },
        "token": "phone-1"
    });

    let (status, _) = call(&h, Method::POST, "/api/tokens", Some(request.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    // Registering twice keeps a single copy.
    let (status, _) = call(&h, Method::POST, "/api/tokens", Some(request.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.tokens_of(resident).await, vec!["existing", "phone-1"]);

    let (status, _) = call(&h, Method::DELETE, "/api/tokens", Some(request)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.tokens_of(resident).await, vec!["existing"]);
}

#[tokio::test]
async fn unknown_recipient_is_not_found() {
    let h = Harness::new();
    let (status, body) = call(
        &h,
        Method::POST,
        "/api/tokens",
        Some(json!({ "scope": { "kind": "admin", "adminId": "nobody" }, "token": "t" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn blank_token_is_rejected() {
    let h = Harness::new();
    h.put("admins/a1", json!({})).await;
    let (status, body) = call(
        &h,
        Method::POST,
        "/api/tokens",
        Some(json!({ "scope": { "kind": "admin", "adminId": "a1" }, "token": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn identifier_with_slash_is_bad_request() {
    let h = Harness::new();
    let (status, _) = call(
        &h,
        Method::POST,
        "/api/tokens",
        Some(json!({ "scope": { "kind": "admin", "adminId": "a/b" }, "token": "t" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
