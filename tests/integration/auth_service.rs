//! End-to-end tests for the account service HTTP surface.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use peerchat_auth::server;
use peerchat_auth::store::UserStore;

fn app() -> Router {
    server::router(Arc::new(UserStore::new()))
}

async fn post(app: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn credentials(username: &str, password: &str) -> serde_json::Value {
    serde_json::json!({"username": username, "password": password})
}

#[tokio::test]
async fn register_then_login_round_trip() {
    let app = app();

    let (status, body) = post(&app, "/register", credentials("ada", "hunter2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User registered successfully");

    let (status, body) = post(&app, "/login", credentials("ada", "hunter2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    // No peer id recorded yet.
    assert!(body.get("peerId").is_none());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();

    let (status, _) = post(&app, "/register", credentials("ada", "hunter2")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, "/register", credentials("ada", "other")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "User already exists");
}

#[tokio::test]
async fn login_unknown_user_is_bad_request() {
    let app = app();
    let (status, body) = post(&app, "/login", credentials("ghost", "boo")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn login_wrong_password_is_unauthorized() {
    let app = app();
    post(&app, "/register", credentials("ada", "hunter2")).await;

    let (status, body) = post(&app, "/login", credentials("ada", "nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid password");
}

#[tokio::test]
async fn missing_fields_are_bad_requests() {
    let app = app();

    let (status, body) = post(&app, "/register", serde_json::json!({"username": "ada"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Username and password are required");

    let (status, _) = post(&app, "/login", serde_json::json!({"password": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(&app, "/updatePeerId", serde_json::json!({"username": "ada"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Username and peerId are required");
}

#[tokio::test]
async fn peer_id_update_flows_into_next_login() {
    let app = app();
    post(&app, "/register", credentials("ada", "hunter2")).await;

    let (status, body) = post(
        &app,
        "/updatePeerId",
        serde_json::json!({"username": "ada", "peerId": "ada-7"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Peer ID updated successfully");

    let (status, body) = post(&app, "/login", credentials("ada", "hunter2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["peerId"], "ada-7");
}

#[tokio::test]
async fn peer_id_update_for_unknown_user_is_bad_request() {
    let app = app();
    let (status, body) = post(
        &app,
        "/updatePeerId",
        serde_json::json!({"username": "ghost", "peerId": "g-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User not found");
}
