//! Nuke config generation and the bounded aws-nuke run.

use crate::error::ResetError;
use crate::storage::ObjectStorage;
use async_trait::async_trait;
use lease_service::services::providers::{CredentialProvider, SessionCredentials};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

/// Where the nuke template comes from.
#[derive(Clone)]
pub enum TemplateSource {
    Local(PathBuf),
    Object {
        storage: Arc<dyn ObjectStorage>,
        bucket: String,
        key: String,
    },
}

impl TemplateSource {
    async fn load(&self) -> Result<String, ResetError> {
        let bytes = match self {
            TemplateSource::Local(path) => tokio::fs::read(path).await.map_err(|e| {
                ResetError::Template(format!("failed to read {}: {}", path.display(), e))
            })?,
            TemplateSource::Object {
                storage,
                bucket,
                key,
            } => storage.get_object(bucket, key).await?,
        };
        String::from_utf8(bytes)
            .map_err(|e| ResetError::Template(format!("template is not valid UTF-8: {}", e)))
    }
}

/// Values substituted into the nuke template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NukeSubstitutions {
    pub account_id: String,
    pub admin_role: String,
    pub principal_role: String,
    pub principal_policy: String,
}

impl NukeSubstitutions {
    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("{{id}}", &self.account_id),
            ("{{admin_role}}", &self.admin_role),
            ("{{principal_role}}", &self.principal_role),
            ("{{principal_policy}}", &self.principal_policy),
        ]
    }
}

/// Literal replacement of every placeholder occurrence.
pub fn substitute_config(template: &str, subs: &NukeSubstitutions) -> String {
    subs.pairs()
        .iter()
        .fold(template.to_string(), |config, (placeholder, value)| {
            config.replace(placeholder, value)
        })
}

/// Renders the template for one account into `<scratch_dir>/dce-config-<id>.yml`.
pub async fn generate_nuke_config(
    account_id: &str,
    subs: &NukeSubstitutions,
    template_source: &TemplateSource,
    scratch_dir: &Path,
) -> Result<PathBuf, ResetError> {
    let template = template_source.load().await?;
    let config = substitute_config(&template, subs);

    tokio::fs::create_dir_all(scratch_dir).await?;
    let path = scratch_dir.join(format!("dce-config-{}.yml", account_id));
    tokio::fs::write(&path, config).await?;

    tracing::info!(account_id = %account_id, path = %path.display(), "Generated nuke config");
    Ok(path)
}

/// The parts of an aws-nuke config the runner checks before starting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NukeConfig {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(rename = "account-blocklist", alias = "account-blacklist", default)]
    pub account_blocklist: Vec<String>,
    #[serde(default)]
    pub accounts: HashMap<String, serde_yaml::Value>,
}

pub async fn load_nuke_config(path: &Path, account_id: &str) -> Result<NukeConfig, ResetError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        ResetError::Template(format!("failed to load nuke config at {}: {}", path.display(), e))
    })?;
    let config: NukeConfig = serde_yaml::from_str(&raw).map_err(|e| {
        ResetError::Template(format!("failed to parse nuke config at {}: {}", path.display(), e))
    })?;
    if !config.accounts.contains_key(account_id) {
        return Err(ResetError::Template(format!(
            "nuke config at {} does not list account {}",
            path.display(),
            account_id
        )));
    }
    Ok(config)
}

/// One aws-nuke invocation against an assumed role.
#[derive(Debug, Clone)]
pub struct NukeRun {
    pub account_id: String,
    pub role_arn: String,
    pub config_path: PathBuf,
    pub no_dry_run: bool,
    pub regions: Vec<String>,
    pub credentials: SessionCredentials,
}

#[async_trait]
pub trait Nuker: Send + Sync {
    async fn run(&self, run: NukeRun) -> Result<(), ResetError>;
}

/// Runs the `aws-nuke` binary with the assumed credentials in its environment.
pub struct AwsNukeCli {
    binary: String,
}

impl AwsNukeCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(run: &NukeRun) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--config".to_string(),
            run.config_path.display().to_string(),
            "--no-prompt".to_string(),
            "--prompt-delay".to_string(),
            "5".to_string(),
            "--max-wait-retries".to_string(),
            "100".to_string(),
        ];
        if run.no_dry_run {
            args.push("--no-dry-run".to_string());
        }
        args
    }
}

#[async_trait]
impl Nuker for AwsNukeCli {
    async fn run(&self, run: NukeRun) -> Result<(), ResetError> {
        let args = Self::args(&run);
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .env("AWS_ACCESS_KEY_ID", &run.credentials.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &run.credentials.secret_access_key)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(token) = &run.credentials.session_token {
            cmd.env("AWS_SESSION_TOKEN", token);
        }

        tracing::info!(
            account_id = %run.account_id,
            binary = %self.binary,
            args = ?args,
            "Starting aws-nuke"
        );
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(account_id = %run.account_id, stderr = %stderr, "aws-nuke failed");
            return Err(ResetError::Nuke(format!(
                "aws-nuke exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NukeAccountInput {
    pub account_id: String,
    pub role_name: String,
    pub config_path: PathBuf,
    pub no_dry_run: bool,
}

impl NukeAccountInput {
    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.role_name)
    }
}

fn describe_deadline(deadline: Duration) -> String {
    let secs = deadline.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} ms", deadline.as_millis())
    }
}

/// Assumes the account's admin role and runs the nuker on its own task,
/// giving up after `deadline`. A run that times out keeps going in the
/// background.
pub async fn nuke_account(
    input: &NukeAccountInput,
    nuker: Arc<dyn Nuker>,
    credentials: &dyn CredentialProvider,
    deadline: Duration,
) -> Result<(), ResetError> {
    let role_arn = input.role_arn();
    let session = credentials
        .assume_role(&role_arn, &format!("DCENuke{}", input.account_id))
        .await
        .map_err(|e| {
            ResetError::AssumeRole(format!(
                "Failed to assume role for nuking account {} as {}: {}",
                input.account_id, role_arn, e
            ))
        })?;

    let config = load_nuke_config(&input.config_path, &input.account_id).await?;

    let run = NukeRun {
        account_id: input.account_id.clone(),
        role_arn: role_arn.clone(),
        config_path: input.config_path.clone(),
        no_dry_run: input.no_dry_run,
        regions: config.regions,
        credentials: session.credentials,
    };
    let handle = tokio::spawn(async move { nuker.run(run).await });

    match tokio::time::timeout(deadline, handle).await {
        Err(_) => {
            tracing::error!(account_id = %input.account_id, "Nuke timed out");
            Err(ResetError::Timeout(format!(
                "Nuke Timed Out after {}",
                describe_deadline(deadline)
            )))
        }
        Ok(Err(join_err)) => Err(ResetError::Nuke(format!(
            "Nuke task for account {} as {} aborted: {}",
            input.account_id, role_arn, join_err
        ))),
        Ok(Ok(Err(e))) => Err(ResetError::Nuke(format!(
            "Failed to run nuke for account {} as {}: {}",
            input.account_id, role_arn, e
        ))),
        Ok(Ok(Ok(()))) => {
            tracing::info!(account_id = %input.account_id, "Nuke Success");
            Ok(())
        }
    }
}

/// Scripted outcome for one [`FakeNuker`] run.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeOutcome {
    Succeed,
    Fail(String),
    /// Never returns.
    Block,
}

/// Plays back scripted outcomes, then repeats the fallback.
pub struct FakeNuker {
    script: Mutex<VecDeque<FakeOutcome>>,
    fallback: FakeOutcome,
    runs: Mutex<Vec<NukeRun>>,
}

impl FakeNuker {
    pub fn new(fallback: FakeOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(FakeOutcome::Succeed)
    }

    pub fn blocking() -> Self {
        Self::new(FakeOutcome::Block)
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = FakeOutcome>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    pub fn runs(&self) -> Vec<NukeRun> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Nuker for FakeNuker {
    async fn run(&self, run: NukeRun) -> Result<(), ResetError> {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(run);
        }
        let outcome = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        match outcome {
            FakeOutcome::Succeed => Ok(()),
            FakeOutcome::Fail(message) => Err(ResetError::Nuke(message)),
            FakeOutcome::Block => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
