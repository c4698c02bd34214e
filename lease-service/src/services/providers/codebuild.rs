use super::{aws_error, BuildTrigger};
use async_trait::async_trait;
use aws_sdk_codebuild::error::DisplayErrorContext;
use aws_sdk_codebuild::operation::start_build::StartBuildOutput;
use aws_sdk_codebuild::types::{EnvironmentVariable, EnvironmentVariableType};
use aws_sdk_codebuild::Client as CodeBuildClient;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct CodeBuildTrigger {
    client: CodeBuildClient,
}

impl CodeBuildTrigger {
    pub fn new(client: CodeBuildClient) -> Self {
        Self { client }
    }
}

/// Id of the build StartBuild started, or empty when the response has none.
fn started_build_id(output: &StartBuildOutput) -> String {
    output
        .build_value()
        .and_then(|b| b.id())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl BuildTrigger for CodeBuildTrigger {
    async fn start_build(
        &self,
        project: &str,
        env: &[(String, String)],
    ) -> Result<String, AppError> {
        let overrides = env
            .iter()
            .map(|(name, value)| {
                EnvironmentVariable::builder()
                    .name(name)
                    .value(value)
                    .r#type(EnvironmentVariableType::Plaintext)
                    .build()
                    .map_err(|e| aws_error("CodeBuild environment override", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .start_build()
            .project_name(project)
            .set_environment_variables_override(Some(overrides))
            .send()
            .await
            .map_err(|e| aws_error("CodeBuild StartBuild", DisplayErrorContext(e)))?;

        let build_id = started_build_id(&output);
        tracing::info!(project = %project, build_id = %build_id, "Build started");
        Ok(build_id)
    }
}

/// Records every requested build; fails for accounts marked with `fail_for`.
#[derive(Default)]
pub struct RecordingBuildTrigger {
    builds: Mutex<Vec<(String, Vec<(String, String)>)>>,
    fail_for: Mutex<HashSet<String>>,
}

impl RecordingBuildTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails builds whose `RESET_ACCOUNT` override equals `account_id`.
    pub fn fail_for(&self, account_id: &str) {
        if let Ok(mut set) = self.fail_for.lock() {
            set.insert(account_id.to_string());
        }
    }

    pub fn builds(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.builds.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Account ids passed in `RESET_ACCOUNT`, in order.
    pub fn accounts(&self) -> Vec<String> {
        self.builds()
            .into_iter()
            .filter_map(|(_, env)| {
                env.into_iter()
                    .find(|(name, _)| name == "RESET_ACCOUNT")
                    .map(|(_, value)| value)
            })
            .collect()
    }
}

#[async_trait]
impl BuildTrigger for RecordingBuildTrigger {
    async fn start_build(
        &self,
        project: &str,
        env: &[(String, String)],
    ) -> Result<String, AppError> {
        let account = env
            .iter()
            .find(|(name, _)| name == "RESET_ACCOUNT")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        let should_fail = self
            .fail_for
            .lock()
            .map(|set| set.contains(&account))
            .unwrap_or(false);
        if should_fail {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "CodeBuild StartBuild failed for {}",
                account
            )));
        }
        let mut builds = self
            .builds
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("build log lock poisoned")))?;
        builds.push((project.to_string(), env.to_vec()));
        Ok(format!("{}:{}", project, builds.len()))
    }
}
