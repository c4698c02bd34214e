use aws_config::{BehaviorVersion, Region};
use lease_service::services::providers::{CredentialProvider, StsCredentialProvider};
use lease_service::services::{MongoStore, SystemClock};
use reset_service::config::ResetConfig;
use reset_service::error::ResetError;
use reset_service::job::{ResetAdapters, ResetJob};
use reset_service::nuke::AwsNukeCli;
use reset_service::pretasks::{SdkAthena, SdkRds};
use reset_service::storage::S3ObjectStorage;
use service_core::observability::init_tracing_stdout;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = match ResetConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing_stdout(&config.log_level);

    let account_id = config.account_id.clone();
    if let Err(e) = run(config).await {
        tracing::error!(account_id = %account_id, error = %e, "Account reset failed");
        std::process::exit(1);
    }
}

async fn run(config: ResetConfig) -> Result<(), ResetError> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;
    let credentials = Arc::new(StsCredentialProvider::new(sdk_config.clone()));

    // Pre-tasks act inside the pool account, as its admin role.
    let admin_session = credentials
        .assume_role(
            &config.admin_role_arn(),
            &format!("DCEResetPreTasks{}", config.account_id),
        )
        .await
        .map_err(|e| {
            ResetError::AssumeRole(format!(
                "Failed to assume role {} for pre-reset tasks: {}",
                config.admin_role_arn(),
                e
            ))
        })?;
    let account_config = admin_session
        .sdk_config
        .unwrap_or_else(|| sdk_config.clone());

    let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database).await?;

    let adapters = ResetAdapters {
        credentials,
        nuker: Arc::new(AwsNukeCli::new(config.nuke_binary.clone())),
        storage: Arc::new(S3ObjectStorage::new(aws_sdk_s3::Client::new(&sdk_config))),
        store: Arc::new(store),
        rds: Arc::new(SdkRds::new(aws_sdk_rds::Client::new(&account_config))),
        athena: Arc::new(SdkAthena::new(aws_sdk_athena::Client::new(&account_config))),
        clock: Arc::new(SystemClock),
    };

    ResetJob::new(config, adapters).run().await
}
