//! Narrow seams to the external collaborators of the lease services.
//!
//! Each trait has a production adapter and an in-process double living next
//! to it.

pub mod codebuild;
pub mod cost;
pub mod email;
pub mod sns;
pub mod sqs;
pub mod sts;

use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;

pub use codebuild::{CodeBuildTrigger, RecordingBuildTrigger};
pub use cost::{CostExplorerProvider, StaticCost};
pub use email::{MockEmailSender, SentEmail, SmtpEmailSender};
pub use sns::{PublishedMessage, RecordingPublisher, SnsPublisher};
pub use sqs::{MemoryQueue, SqsQueue};
pub use sts::{FakeCredentials, StsCredentialProvider};

/// A message pulled from a work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn receive_messages(&self, max: i32) -> Result<Vec<QueueMessage>, AppError>;

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), AppError>;

    async fn send_message(&self, body: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait BuildTrigger: Send + Sync {
    /// Starts `project` with the given environment overrides; returns the build id.
    async fn start_build(&self, project: &str, env: &[(String, String)])
        -> Result<String, AppError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_message(
        &self,
        topic_arn: &str,
        body: &str,
        is_json: bool,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        from: &str,
        to: &[String],
        bcc: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait CostProvider: Send + Sync {
    /// Total unblended cost between two epoch-second instants.
    async fn calculate_total_spend(&self, start: i64, end: i64) -> Result<f64, AppError>;
}

/// Temporary credentials issued for an assumed role.
#[derive(Clone)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Everything obtained by assuming a role in a pool account.
#[derive(Clone)]
pub struct AwsSession {
    pub role_arn: String,
    pub credentials: SessionCredentials,
    pub cost: Arc<dyn CostProvider>,
    /// SDK configuration bound to the assumed credentials, absent for doubles.
    pub sdk_config: Option<aws_config::SdkConfig>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume_role(&self, role_arn: &str, session_name: &str)
        -> Result<AwsSession, AppError>;
}

pub(crate) fn aws_error(operation: &str, e: impl std::fmt::Display) -> AppError {
    AppError::InternalError(anyhow::anyhow!("{} failed: {}", operation, e))
}
