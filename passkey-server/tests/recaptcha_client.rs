//! Site-verify client against a local stand-in for the provider endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{http::StatusCode, routing::post, Form, Json, Router};
use passkey_core::captcha::{
    RecaptchaClient, RecaptchaClientConfig, SiteVerifier, SiteVerifyError,
};
use serde_json::{json, Value};

const SECRET: &str = "test-secret";

async fn siteverify(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    if form.get("secret").map(String::as_str) != Some(SECRET) {
        return Json(json!({ "success": false, "error-codes": ["invalid-input-secret"] }));
    }
    match form.get("response").map(String::as_str) {
        Some("good") => Json(json!({
            "success": true,
            "score": 0.7,
            "action": "register",
            "challenge_ts": "2026-01-01T00:00:00Z",
            "hostname": "localhost",
        })),
        _ => Json(json!({ "success": false, "error-codes": ["invalid-input-response"] })),
    }
}

async fn spawn_stub() -> SocketAddr {
    let app = Router::new()
        .route("/siteverify", post(siteverify))
        .route(
            "/unavailable",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route("/bad-request", post(|| async { StatusCode::BAD_REQUEST }))
        .route("/garbage", post(|| async { "<html>not json</html>" }))
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "success": true }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, path: &str, timeout: Duration) -> RecaptchaClient {
    RecaptchaClient::new(RecaptchaClientConfig {
        verify_url: format!("http://{addr}{path}"),
        timeout,
    })
    .unwrap()
}

#[tokio::test]
async fn test_successful_verification_returns_score() {
    let addr = spawn_stub().await;
    let client = client(addr, "/siteverify", Duration::from_secs(5));

    let response = client.verify("good", SECRET).await.unwrap();
    assert!(response.success);
    assert_eq!(response.score, Some(0.7));
    assert_eq!(response.action.as_deref(), Some("register"));
    assert_eq!(response.hostname.as_deref(), Some("localhost"));
    assert!(response.error_codes.is_empty());
}

#[tokio::test]
async fn test_rejected_token_reports_error_codes() {
    let addr = spawn_stub().await;
    let client = client(addr, "/siteverify", Duration::from_secs(5));

    let response = client.verify("forged", SECRET).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error_codes, vec!["invalid-input-response"]);

    let response = client.verify("good", "wrong-secret").await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error_codes, vec!["invalid-input-secret"]);
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let addr = spawn_stub().await;
    let client = client(addr, "/unavailable", Duration::from_secs(5));

    let err = client.verify("good", SECRET).await.unwrap_err();
    assert!(matches!(err, SiteVerifyError::Unavailable(_)));
}

#[tokio::test]
async fn test_client_error_is_invalid_response() {
    let addr = spawn_stub().await;
    let client = client(addr, "/bad-request", Duration::from_secs(5));

    let err = client.verify("good", SECRET).await.unwrap_err();
    assert!(matches!(err, SiteVerifyError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let addr = spawn_stub().await;
    let client = client(addr, "/garbage", Duration::from_secs(5));

    let err = client.verify("good", SECRET).await.unwrap_err();
    assert!(matches!(err, SiteVerifyError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let addr = spawn_stub().await;
    let client = client(addr, "/slow", Duration::from_millis(200));

    let err = client.verify("good", SECRET).await.unwrap_err();
    assert!(matches!(err, SiteVerifyError::Timeout));
}
