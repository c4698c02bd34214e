use super::{aws_error, EventPublisher};
use async_trait::async_trait;
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::Client as SnsClient;
use service_core::error::AppError;
use std::sync::Mutex;

pub struct SnsPublisher {
    client: SnsClient,
}

impl SnsPublisher {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

/// Wraps a JSON payload in the `{"default": ...}` envelope SNS expects for
/// `MessageStructure=json`.
pub fn json_envelope(body: &str) -> Result<String, AppError> {
    serde_json::to_string(&serde_json::json!({ "default": body }))
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("SNS envelope failed: {}", e)))
}

#[async_trait]
impl EventPublisher for SnsPublisher {
    async fn publish_message(
        &self,
        topic_arn: &str,
        body: &str,
        is_json: bool,
    ) -> Result<(), AppError> {
        let mut request = self.client.publish().topic_arn(topic_arn);
        request = if is_json {
            request.message(json_envelope(body)?).message_structure("json")
        } else {
            request.message(body)
        };
        request
            .send()
            .await
            .map_err(|e| aws_error("SNS Publish", DisplayErrorContext(e)))?;
        tracing::debug!(topic_arn = %topic_arn, "Event published");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic_arn: String,
    pub body: String,
    pub is_json: bool,
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    fail: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn published_to(&self, topic_arn: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic_arn == topic_arn)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_message(
        &self,
        topic_arn: &str,
        body: &str,
        is_json: bool,
    ) -> Result<(), AppError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "SNS Publish failed: topic {} unavailable",
                topic_arn
            )));
        }
        let mut published = self
            .published
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("publish log lock poisoned")))?;
        published.push(PublishedMessage {
            topic_arn: topic_arn.to_string(),
            body: body.to_string(),
            is_json,
        });
        Ok(())
    }
}
