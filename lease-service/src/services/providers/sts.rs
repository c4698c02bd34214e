use super::{
    aws_error, AwsSession, CostExplorerProvider, CostProvider, CredentialProvider,
    SessionCredentials, StaticCost,
};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sts::config::{Credentials, SharedCredentialsProvider};
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Assumes roles in pool accounts with the service's own credentials.
pub struct StsCredentialProvider {
    sdk_config: SdkConfig,
    client: StsClient,
}

impl StsCredentialProvider {
    pub fn new(sdk_config: SdkConfig) -> Self {
        let client = StsClient::new(&sdk_config);
        Self { sdk_config, client }
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AwsSession, AppError> {
        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|e| aws_error("STS AssumeRole", DisplayErrorContext(e)))?;

        let issued = output.credentials().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "STS AssumeRole returned no credentials for {}",
                role_arn
            ))
        })?;
        let credentials = SessionCredentials {
            access_key_id: issued.access_key_id().to_string(),
            secret_access_key: issued.secret_access_key().to_string(),
            session_token: Some(issued.session_token().to_string()),
        };

        let provider = SharedCredentialsProvider::new(Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "lease-service-assume-role",
        ));
        let session_config = self
            .sdk_config
            .to_builder()
            .credentials_provider(provider)
            .build();
        let cost = CostExplorerProvider::new(aws_sdk_costexplorer::Client::new(&session_config));

        tracing::debug!(role_arn = %role_arn, session_name = %session_name, "Assumed role");
        Ok(AwsSession {
            role_arn: role_arn.to_string(),
            credentials,
            cost: Arc::new(cost),
            sdk_config: Some(session_config),
        })
    }
}

/// Hands out sessions backed by a shared [`StaticCost`].
pub struct FakeCredentials {
    cost: Arc<StaticCost>,
    assumed: Mutex<Vec<(String, String)>>,
    deny: Mutex<HashSet<String>>,
}

impl FakeCredentials {
    pub fn new(cost: Arc<StaticCost>) -> Self {
        Self {
            cost,
            assumed: Mutex::new(Vec::new()),
            deny: Mutex::new(HashSet::new()),
        }
    }

    pub fn deny(&self, role_arn: &str) {
        if let Ok(mut set) = self.deny.lock() {
            set.insert(role_arn.to_string());
        }
    }

    /// `(role_arn, session_name)` pairs, in order.
    pub fn assumed(&self) -> Vec<(String, String)> {
        self.assumed.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AwsSession, AppError> {
        let denied = self
            .deny
            .lock()
            .map(|set| set.contains(role_arn))
            .unwrap_or(false);
        if denied {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "STS AssumeRole failed: access denied for {}",
                role_arn
            )));
        }
        if let Ok(mut assumed) = self.assumed.lock() {
            assumed.push((role_arn.to_string(), session_name.to_string()));
        }
        let cost: Arc<dyn CostProvider> = self.cost.clone();
        Ok(AwsSession {
            role_arn: role_arn.to_string(),
            credentials: SessionCredentials {
                access_key_id: "AKIAFAKE".to_string(),
                secret_access_key: "fake-secret".to_string(),
                session_token: Some("fake-token".to_string()),
            },
            cost,
            sdk_config: None,
        })
    }
}
