#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use lease_service::config::{
    AwsConfig, LeaseConfig, LeasePolicy, MongoConfig, NotificationSettings, NotificationTemplates,
    SmtpConfig,
};
use lease_service::models::{Account, AccountStatus};
use lease_service::services::providers::{
    FakeCredentials, MemoryQueue, MockEmailSender, RecordingBuildTrigger, RecordingPublisher,
    StaticCost,
};
use lease_service::services::store::{AccountWriter, MemoryStore};
use lease_service::services::FixedClock;
use lease_service::startup::{build_router, Adapters, AppState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const LOCKED_TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:lease-locked";
pub const EVENTS_TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:lease-events";
pub const RESET_BUILD: &str = "ResetCodeBuild";

/// Router over the in-memory store and recording fakes.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub builds: Arc<RecordingBuildTrigger>,
    pub publisher: Arc<RecordingPublisher>,
    pub email: Arc<MockEmailSender>,
    pub cost: Arc<StaticCost>,
    pub credentials: Arc<FakeCredentials>,
    pub clock: Arc<FixedClock>,
}

/// Wednesday noon, UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
}

pub fn test_config() -> LeaseConfig {
    LeaseConfig {
        common: service_core::config::Config::default(),
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "lease_test".to_string(),
        },
        aws: AwsConfig {
            region: "us-east-1".to_string(),
            reset_queue_url: "https://sqs.us-east-1.amazonaws.com/123456789012/reset".to_string(),
            reset_build_name: RESET_BUILD.to_string(),
            lease_locked_topic_arn: LOCKED_TOPIC.to_string(),
            lease_events_topic_arn: EVENTS_TOPIC.to_string(),
        },
        policy: LeasePolicy::default(),
        notification: NotificationSettings {
            from_email: "budget@example.com".to_string(),
            bcc_emails: vec![],
            templates: NotificationTemplates {
                html: "<p>{{ ThresholdPercentile }}</p>".to_string(),
                text: "threshold={{ ThresholdPercentile }} over={{ IsOverBudget }}".to_string(),
                subject: "Budget {{ ThresholdPercentile }}%".to_string(),
            },
            threshold_percentiles: vec![75.0, 100.0],
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            user: String::new(),
            password: String::new(),
            enabled: false,
        },
        otlp_endpoint: "http://localhost:4317".to_string(),
    }
}

pub fn account(id: &str, status: AccountStatus) -> Account {
    Account {
        id: id.to_string(),
        status,
        admin_role_arn: format!("arn:aws:iam::{}:role/AdminRole", id),
        principal_role_arn: format!("arn:aws:iam::{}:role/PrincipalRole", id),
        principal_policy_hash: String::new(),
        created_on: 0,
        last_modified_on: 0,
        metadata: HashMap::new(),
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: LeaseConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let builds = Arc::new(RecordingBuildTrigger::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let email = Arc::new(MockEmailSender::new());
        let cost = Arc::new(StaticCost::new(0.0));
        let credentials = Arc::new(FakeCredentials::new(cost.clone()));
        let clock = Arc::new(FixedClock::new(test_now()));

        let state = AppState::new(
            &config,
            Adapters {
                store: store.clone(),
                reset_queue: queue.clone(),
                builds: builds.clone(),
                publisher: publisher.clone(),
                email: email.clone(),
                credentials: credentials.clone(),
                clock: clock.clone(),
            },
        );

        TestApp {
            router: build_router(state.clone()),
            state,
            store,
            queue,
            builds,
            publisher,
            email,
            cost,
            credentials,
            clock,
        }
    }

    pub async fn add_account(&self, id: &str, status: AccountStatus) {
        self.store
            .put_account(&account(id, status))
            .await
            .expect("Failed to seed account");
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("Failed to build request"))
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::POST, uri, None).await
    }

    pub async fn delete(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, body).await
    }
}
