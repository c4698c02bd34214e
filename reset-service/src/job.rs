//! One reset of one pool account.

use crate::config::ResetConfig;
use crate::error::ResetError;
use crate::nuke::{generate_nuke_config, nuke_account, NukeAccountInput, Nuker};
use crate::post_reset::update_db_post_reset;
use crate::pretasks::{run_pre_tasks, AthenaApi, RdsApi};
use crate::storage::ObjectStorage;
use lease_service::services::providers::CredentialProvider;
use lease_service::services::{Clock, RecordStore};
use service_core::retry::{retry, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const NUKE_ATTEMPTS: u32 = 3;

/// External collaborators a reset job runs against.
pub struct ResetAdapters {
    pub credentials: Arc<dyn CredentialProvider>,
    pub nuker: Arc<dyn Nuker>,
    pub storage: Arc<dyn ObjectStorage>,
    pub store: Arc<dyn RecordStore>,
    pub rds: Arc<dyn RdsApi>,
    pub athena: Arc<dyn AthenaApi>,
    pub clock: Arc<dyn Clock>,
}

pub struct ResetJob {
    config: ResetConfig,
    adapters: ResetAdapters,
    retry_policy: RetryPolicy,
    deadline: Duration,
}

impl ResetJob {
    pub fn new(config: ResetConfig, adapters: ResetAdapters) -> Self {
        let deadline = config.nuke_deadline();
        Self {
            config,
            adapters,
            retry_policy: RetryPolicy::with_attempts(NUKE_ATTEMPTS),
            deadline,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the per-attempt nuke deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn config(&self) -> &ResetConfig {
        &self.config
    }

    #[tracing::instrument(skip(self), fields(account_id = %self.config.account_id, dry_run = self.config.nuke_dry_run))]
    pub async fn run(&self) -> Result<(), ResetError> {
        let config = &self.config;
        let dry_run = config.nuke_dry_run;

        if dry_run {
            tracing::warn!(
                "Dry run is enabled: resources will only be listed and the account stays out of the pool"
            );
        } else {
            run_pre_tasks(self.adapters.rds.as_ref(), self.adapters.athena.as_ref()).await?;
        }

        let template = config.template_source(self.adapters.storage.clone());
        let config_path = generate_nuke_config(
            &config.account_id,
            &config.substitutions(),
            &template,
            &config.scratch_dir,
        )
        .await?;

        let input = NukeAccountInput {
            account_id: config.account_id.clone(),
            role_name: config.admin_role_name.clone(),
            config_path,
            no_dry_run: !dry_run,
        };
        let input = &input;
        let nuker = self.adapters.nuker.clone();
        let credentials = self.adapters.credentials.as_ref();
        let deadline = self.deadline;
        retry(&self.retry_policy, "nuke_account", move || {
            nuke_account(input, nuker.clone(), credentials, deadline)
        })
        .await?;

        if !dry_run {
            update_db_post_reset(
                self.adapters.store.as_ref(),
                &config.account_id,
                self.adapters.clock.now().timestamp(),
            )
            .await?;
        }

        tracing::info!("Account reset complete");
        Ok(())
    }
}
