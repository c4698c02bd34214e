mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestApp;
use lease_service::models::AccountStatus;
use lease_service::services::init_metrics;
use serde_json::json;
use service_core::middleware::REQUEST_ID_HEADER;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "lease-service");
}

#[tokio::test]
async fn readiness_reflects_store() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    init_metrics();
    let app = TestApp::spawn();
    app.get("/health").await;

    let (status, body) = app.get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("http_requests_total"));
}

#[tokio::test]
async fn lease_transitions_are_exported() {
    init_metrics();
    let app = TestApp::spawn();
    app.add_account("111111111111", AccountStatus::Ready).await;
    let (status, lease) = app
        .post("/leases", json!({ "principal_id": "alice", "budget_amount": 10.0 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.delete(&format!("/leases/{}", lease["id"].as_str().unwrap()), None)
        .await;

    let (_, body) = app.get("/metrics").await;

    let text = body.as_str().unwrap();
    assert!(text.contains("lease_transitions_total"));
    assert!(text.contains("reason=\"Destroyed\""));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::spawn();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(REQUEST_ID_HEADER, "req-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-1");
}
