//! Common test utilities for workflow tests.

#![allow(dead_code)]

use axum::http::StatusCode;
use serde_json::{json, Value};
use workflow_tests::WorkflowTestContext;

pub const ACCOUNT: &str = "123456789012";

/// Context with one Ready account in the pool.
pub async fn setup() -> WorkflowTestContext {
    let ctx = WorkflowTestContext::new().expect("Failed to create workflow test context");
    ctx.add_account(ACCOUNT)
        .await
        .expect("Failed to seed pool account");
    ctx
}

/// Creates a lease for `principal` and returns its id.
pub async fn lease_account(ctx: &WorkflowTestContext, principal: &str, budget: f64) -> String {
    let (status, body) = ctx
        .post(
            "/leases",
            json!({
                "principal_id": principal,
                "budget_amount": budget,
                "budget_notification_emails": [format!("{}@example.com", principal)]
            }),
        )
        .await
        .expect("Failed to create lease");
    assert_eq!(status, StatusCode::CREATED, "unexpected create response: {}", body);
    body["id"].as_str().expect("lease id").to_string()
}

pub async fn drain(ctx: &WorkflowTestContext) -> (StatusCode, Value) {
    ctx.post_empty("/reset-queue/drain")
        .await
        .expect("Failed to drain reset queue")
}
