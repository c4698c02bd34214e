//! Cross-service account lifecycle tests.
//!
//! Wires the lease service router and the reset job over one in-memory
//! record store and shared AWS doubles, so a test can walk an account
//! through lease, lock, drain, nuke and return to the pool in-process.
//!
//! ## Usage
//!
//! ```bash
//! cargo test -p workflow-tests
//! ```

use anyhow::{anyhow, Context, Result};
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
use reset_service::config::ResetConfig;
use reset_service::job::{ResetAdapters, ResetJob};
use reset_service::nuke::Nuker;
use reset_service::pretasks::{RecordingAthena, RecordingRds};
use reset_service::storage::MemoryObjectStorage;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Once};
use tower::ServiceExt;

pub const LOCKED_TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:lease-locked";
pub const EVENTS_TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:lease-events";
pub const RESET_BUILD: &str = "ResetCodeBuild";
pub const PRINCIPAL_POLICY: &str = "DCEPrincipalDefaultPolicy";

const NUKE_TEMPLATE: &str = "regions:\n  - us-east-1\naccounts:\n  \"{{id}}\":\n    filters:\n      IAMRole:\n        - \"{{admin_role}}\"\n        - \"{{principal_role}}\"\n      IAMPolicy:\n        - \"{{principal_policy}}\"\n";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,workflow_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Wednesday noon, UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn lease_config() -> LeaseConfig {
    LeaseConfig {
        common: service_core::config::Config::default(),
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "workflow_test".to_string(),
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
            templates: NotificationTemplates::default(),
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

pub fn pool_account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        status: AccountStatus::Ready,
        admin_role_arn: format!("arn:aws:iam::{}:role/DCEAdmin", id),
        principal_role_arn: format!("arn:aws:iam::{}:role/dce/DCEPrincipal", id),
        principal_policy_hash: String::new(),
        created_on: 0,
        last_modified_on: 0,
        metadata: HashMap::new(),
    }
}

/// Lease service and reset job sharing one store and one set of doubles.
pub struct WorkflowTestContext {
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
    scratch: tempfile::TempDir,
}

impl WorkflowTestContext {
    pub fn new() -> Result<Self> {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let builds = Arc::new(RecordingBuildTrigger::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let email = Arc::new(MockEmailSender::new());
        let cost = Arc::new(StaticCost::new(0.0));
        let credentials = Arc::new(FakeCredentials::new(cost.clone()));
        let clock = Arc::new(FixedClock::new(start_time()));

        let state = AppState::new(
            &lease_config(),
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

        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        std::fs::write(scratch.path().join("nuke-template.yml"), NUKE_TEMPLATE)
            .context("Failed to write nuke template")?;

        Ok(Self {
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
            scratch,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub async fn add_account(&self, id: &str) -> Result<()> {
        self.store.put_account(&pool_account(id)).await?;
        Ok(())
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self.router.clone().oneshot(builder.body(body)?).await?;

        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok((status, json))
    }

    pub async fn get(&self, uri: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, None).await
    }

    pub async fn delete(&self, uri: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::DELETE, uri, None).await
    }

    /// Builds the reset job a started reset build would run, from the
    /// environment the drainer passed to that build.
    pub fn reset_job_for_build(&self, index: usize, nuker: Arc<dyn Nuker>) -> Result<ResetJob> {
        let builds = self.builds.builds();
        let (project, env) = builds
            .get(index)
            .ok_or_else(|| anyhow!("no reset build at index {}", index))?;
        if project != RESET_BUILD {
            return Err(anyhow!("unexpected build project {}", project));
        }
        let var = |name: &str| {
            env.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| anyhow!("{} missing from build environment", name))
        };

        let config = ResetConfig {
            log_level: "info".to_string(),
            region: "us-east-1".to_string(),
            account_id: var("RESET_ACCOUNT")?,
            admin_role_name: var("RESET_ACCOUNT_ADMIN_ROLE_NAME")?,
            principal_role_name: var("RESET_ACCOUNT_PRINCIPAL_ROLE_NAME")?,
            principal_policy_name: PRINCIPAL_POLICY.to_string(),
            nuke_dry_run: false,
            nuke_template_default: self.scratch.path().join("nuke-template.yml"),
            nuke_template_bucket: None,
            nuke_template_key: None,
            nuke_timeout_minutes: 1,
            nuke_binary: "aws-nuke".to_string(),
            scratch_dir: self.scratch.path().to_path_buf(),
            mongodb: lease_config().mongodb,
        };

        Ok(ResetJob::new(
            config,
            ResetAdapters {
                credentials: self.credentials.clone(),
                nuker,
                storage: Arc::new(MemoryObjectStorage::new()),
                store: self.store.clone(),
                rds: Arc::new(RecordingRds::new()),
                athena: Arc::new(RecordingAthena::new()),
                clock: self.clock.clone(),
            },
        ))
    }
}
