mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{test_now, TestApp, LOCKED_TOPIC};
use lease_service::models::{start_of_day, AccountStatus, Usage};
use lease_service::services::store::{LeaseReader, UsageStore};
use lease_service::services::Clock;
use serde_json::{json, Value};

async fn create_lease(app: &TestApp, budget: f64) -> String {
    app.add_account("111111111111", AccountStatus::Ready).await;
    let (status, body) = app
        .post(
            "/leases",
            json!({
                "principal_id": "alice",
                "budget_amount": budget,
                "budget_notification_emails": ["alice@example.com"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn budget_check(app: &TestApp, id: &str) -> (StatusCode, Value) {
    app.post_empty(&format!("/leases/{}/budget-check", id)).await
}

async fn create_lease_on(app: &TestApp, principal: &str, account: &str, budget: f64) -> String {
    app.add_account(account, AccountStatus::Ready).await;
    let (status, body) = app
        .post(
            "/leases",
            json!({
                "principal_id": principal,
                "account_id": account,
                "budget_amount": budget,
                "budget_notification_emails": [format!("{}@example.com", principal)]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn over_budget_lease_is_locked_and_queued() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.cost.set(150.0);

    let (status, body) = budget_check(&app, &id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lease"]["status"], "Inactive");
    assert_eq!(body["lease"]["status_reason"], "OverBudget");
    assert_eq!(app.publisher.published_to(LOCKED_TOPIC).len(), 1);
    assert_eq!(app.queue.sent(), vec!["111111111111".to_string()]);

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "threshold=100 over=true");
    assert_eq!(
        app.credentials.assumed(),
        vec![(
            "arn:aws:iam::111111111111:role/AdminRole".to_string(),
            "DCEBudgetCheck111111111111".to_string()
        )]
    );
}

#[tokio::test]
async fn crossing_a_threshold_only_notifies() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.cost.set(76.0);

    let (status, body) = budget_check(&app, &id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lease"]["status"], "Active");
    assert!(app.publisher.published_to(LOCKED_TOPIC).is_empty());
    assert!(app.queue.sent().is_empty());

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Budget 75%");
    assert_eq!(sent[0].text, "threshold=75 over=false");
    assert_eq!(sent[0].to, vec!["alice@example.com".to_string()]);
}

#[tokio::test]
async fn under_budget_is_a_no_op() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.cost.set(50.0);

    let (status, body) = budget_check(&app, &id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lease"]["status"], "Active");
    assert_eq!(app.email.send_count(), 0);
    assert!(app.queue.sent().is_empty());
}

#[tokio::test]
async fn expired_lease_is_locked_with_expired_reason() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.clock.advance(Duration::days(8));

    let (_, body) = budget_check(&app, &id).await;

    assert_eq!(body["lease"]["status"], "Inactive");
    assert_eq!(body["lease"]["status_reason"], "Expired");
}

#[tokio::test]
async fn principal_spend_on_other_accounts_counts_against_principal_budget() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    // Earlier this week, on a different account.
    let monday = start_of_day(test_now()) - Duration::days(2);
    app.store
        .put_usage(&Usage::for_day("alice", "999999999999", monday, 1200.0, None))
        .await
        .unwrap();
    app.cost.set(10.0);

    let (_, body) = budget_check(&app, &id).await;

    assert_eq!(body["lease"]["status"], "Inactive");
    assert_eq!(body["lease"]["status_reason"], "OverPrincipalBudget");
}

#[tokio::test]
async fn cost_lookup_failure_is_a_server_error() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.cost.fail(true);

    let (status, body) = budget_check(&app, &id).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "unknown error");
}

#[tokio::test]
async fn email_failure_still_locks_but_reports_error() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.cost.set(200.0);
    app.email.fail(true);

    let (status, _) = budget_check(&app, &id).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, lease) = app.get(&format!("/leases/{}", id)).await;
    assert_eq!(lease["status"], "Inactive");
    assert_eq!(lease["status_reason"], "OverBudget");
}

#[tokio::test]
async fn cached_usage_since_activation_counts_toward_lease_spend() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    let started = start_of_day(test_now());
    // The day before the lease started does not count.
    app.store
        .put_usage(&Usage::for_day("alice", "111111111111", started - Duration::days(1), 500.0, None))
        .await
        .unwrap();
    app.store
        .put_usage(&Usage::for_day("alice", "111111111111", started + Duration::days(1), 60.0, None))
        .await
        .unwrap();
    app.clock.advance(Duration::days(2));
    app.cost.set(50.0);

    let (status, body) = budget_check(&app, &id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lease"]["status"], "Inactive");
    assert_eq!(body["lease"]["status_reason"], "OverBudget");
    assert_eq!(body["lease"]["status_modified_on"], app.clock.now().timestamp());
    let sent = app.email.sent();
    assert_eq!(sent[0].text, "threshold=100 over=true");
}

#[tokio::test]
async fn today_alone_under_budget_keeps_lease_active() {
    let app = TestApp::spawn();
    let id = create_lease(&app, 100.0).await;
    app.clock.advance(Duration::days(2));
    app.cost.set(50.0);

    let (_, body) = budget_check(&app, &id).await;

    assert_eq!(body["lease"]["status"], "Active");
}

#[tokio::test]
async fn sweep_checks_every_active_lease_past_a_failure() {
    let app = TestApp::spawn();
    let alice = create_lease_on(&app, "alice", "111111111111", 100.0).await;
    let bob = create_lease_on(&app, "bob", "222222222222", 100.0).await;
    app.credentials.deny("arn:aws:iam::111111111111:role/AdminRole");
    app.cost.set(150.0);

    let (status, body) = app.post_empty("/leases/budget-check").await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["checked"], 2);
    assert_eq!(body["failed"], json!([alice.clone()]));

    let bob_lease = app.store.get_lease(&bob).await.unwrap().unwrap();
    assert_eq!(bob_lease.status.as_str(), "Inactive");
    assert_eq!(bob_lease.status_reason.as_str(), "OverBudget");
    assert_eq!(app.queue.sent(), vec!["222222222222".to_string()]);

    let alice_lease = app.store.get_lease(&alice).await.unwrap().unwrap();
    assert_eq!(alice_lease.status.as_str(), "Active");
}

#[tokio::test]
async fn sweep_skips_leases_that_are_not_active() {
    let app = TestApp::spawn();
    let ended = create_lease_on(&app, "alice", "111111111111", 100.0).await;
    create_lease_on(&app, "bob", "222222222222", 100.0).await;
    let (status, _) = app.delete(&format!("/leases/{}", ended), None).await;
    assert_eq!(status, StatusCode::OK);
    app.cost.set(10.0);

    let (status, body) = app.post_empty("/leases/budget-check").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checked"], 1);
    assert_eq!(body["failed"], json!([]));
    assert_eq!(
        app.credentials.assumed(),
        vec![(
            "arn:aws:iam::222222222222:role/AdminRole".to_string(),
            "DCEBudgetCheck222222222222".to_string()
        )]
    );
}
