//! Cleanup that aws-nuke cannot do on its own: RDS automated backups and
//! Athena workgroups and named queries.

use crate::error::ResetError;
use async_trait::async_trait;
use aws_sdk_athena::Client as AthenaClient;
use aws_sdk_rds::Client as RdsClient;
use std::collections::HashMap;
use std::sync::Mutex;

const ATHENA_PRIMARY_WORKGROUP: &str = "primary";
const ATHENA_LIST_LIMIT: i32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct DbInstance {
    pub identifier: String,
    pub dbi_resource_id: String,
}

#[async_trait]
pub trait RdsApi: Send + Sync {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstance>, ResetError>;
    /// Sets the backup retention period to 0, applied immediately.
    async fn disable_backup_retention(&self, identifier: &str) -> Result<(), ResetError>;
    /// Resource ids of the automated backups kept for an instance.
    async fn describe_automated_backups(&self, dbi_resource_id: &str)
        -> Result<Vec<String>, ResetError>;
    async fn delete_automated_backup(&self, dbi_resource_id: &str) -> Result<(), ResetError>;
}

#[async_trait]
pub trait AthenaApi: Send + Sync {
    async fn list_work_groups(&self, max_results: i32) -> Result<Vec<String>, ResetError>;
    /// Deletes a workgroup together with its named queries and history.
    async fn delete_work_group(&self, name: &str) -> Result<(), ResetError>;
    async fn list_named_queries(&self) -> Result<Vec<String>, ResetError>;
    async fn delete_named_query(&self, id: &str) -> Result<(), ResetError>;
}

fn rds_error(err: impl std::error::Error) -> ResetError {
    ResetError::pre_task("rds", aws_sdk_rds::error::DisplayErrorContext(err))
}

fn athena_error(err: impl std::error::Error) -> ResetError {
    ResetError::pre_task("athena", aws_sdk_athena::error::DisplayErrorContext(err))
}

pub struct SdkRds {
    client: RdsClient,
}

impl SdkRds {
    pub fn new(client: RdsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RdsApi for SdkRds {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstance>, ResetError> {
        let output = self
            .client
            .describe_db_instances()
            .send()
            .await
            .map_err(rds_error)?;
        Ok(output
            .db_instances()
            .iter()
            .filter_map(|db| {
                Some(DbInstance {
                    identifier: db.db_instance_identifier()?.to_string(),
                    dbi_resource_id: db.dbi_resource_id()?.to_string(),
                })
            })
            .collect())
    }

    async fn disable_backup_retention(&self, identifier: &str) -> Result<(), ResetError> {
        self.client
            .modify_db_instance()
            .db_instance_identifier(identifier)
            .backup_retention_period(0)
            .apply_immediately(true)
            .send()
            .await
            .map_err(rds_error)?;
        Ok(())
    }

    async fn describe_automated_backups(
        &self,
        dbi_resource_id: &str,
    ) -> Result<Vec<String>, ResetError> {
        let output = self
            .client
            .describe_db_instance_automated_backups()
            .dbi_resource_id(dbi_resource_id)
            .send()
            .await
            .map_err(rds_error)?;
        Ok(output
            .db_instance_automated_backups()
            .iter()
            .filter_map(|b| b.dbi_resource_id().map(str::to_string))
            .collect())
    }

    async fn delete_automated_backup(&self, dbi_resource_id: &str) -> Result<(), ResetError> {
        self.client
            .delete_db_instance_automated_backup()
            .dbi_resource_id(dbi_resource_id)
            .send()
            .await
            .map_err(rds_error)?;
        Ok(())
    }
}

pub struct SdkAthena {
    client: AthenaClient,
}

impl SdkAthena {
    pub fn new(client: AthenaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AthenaApi for SdkAthena {
    async fn list_work_groups(&self, max_results: i32) -> Result<Vec<String>, ResetError> {
        let output = self
            .client
            .list_work_groups()
            .max_results(max_results)
            .send()
            .await
            .map_err(athena_error)?;
        Ok(output
            .work_groups()
            .iter()
            .filter_map(|wg| wg.name().map(str::to_string))
            .collect())
    }

    async fn delete_work_group(&self, name: &str) -> Result<(), ResetError> {
        self.client
            .delete_work_group()
            .work_group(name)
            .recursive_delete_option(true)
            .send()
            .await
            .map_err(athena_error)?;
        Ok(())
    }

    async fn list_named_queries(&self) -> Result<Vec<String>, ResetError> {
        let output = self
            .client
            .list_named_queries()
            .send()
            .await
            .map_err(athena_error)?;
        Ok(output.named_query_ids().to_vec())
    }

    async fn delete_named_query(&self, id: &str) -> Result<(), ResetError> {
        self.client
            .delete_named_query()
            .named_query_id(id)
            .send()
            .await
            .map_err(athena_error)?;
        Ok(())
    }
}

/// Turns off automated backups on every instance and removes the backups
/// already taken.
pub async fn delete_rds_backups(rds: &dyn RdsApi) -> Result<(), ResetError> {
    for instance in rds.describe_db_instances().await? {
        tracing::info!(instance = %instance.identifier, "Setting backup retention to 0");
        rds.disable_backup_retention(&instance.identifier).await?;

        for backup in rds.describe_automated_backups(&instance.dbi_resource_id).await? {
            // A zero retention period removes these too; deletion only speeds it up.
            if let Err(e) = rds.delete_automated_backup(&backup).await {
                tracing::warn!(backup = %backup, error = %e, "Ignoring automated backup delete failure");
            }
        }
    }
    Ok(())
}

pub async fn delete_athena_resources(athena: &dyn AthenaApi) -> Result<(), ResetError> {
    for work_group in athena.list_work_groups(ATHENA_LIST_LIMIT).await? {
        if work_group == ATHENA_PRIMARY_WORKGROUP {
            continue;
        }
        tracing::info!(work_group = %work_group, "Deleting Athena workgroup");
        athena.delete_work_group(&work_group).await.map_err(|e| {
            tracing::error!(work_group = %work_group, error = %e, "Athena workgroup delete failed");
            e
        })?;
    }

    for query_id in athena.list_named_queries().await? {
        tracing::info!(named_query = %query_id, "Deleting Athena named query");
        athena.delete_named_query(&query_id).await?;
    }
    Ok(())
}

pub async fn run_pre_tasks(rds: &dyn RdsApi, athena: &dyn AthenaApi) -> Result<(), ResetError> {
    tracing::info!("Running pre-reset tasks");
    delete_rds_backups(rds).await?;
    delete_athena_resources(athena).await?;
    tracing::info!("Pre-reset tasks complete");
    Ok(())
}

/// In-memory RDS that records every mutating call.
#[derive(Default)]
pub struct RecordingRds {
    instances: Vec<DbInstance>,
    backups: HashMap<String, Vec<String>>,
    fail_describe: bool,
    fail_delete: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingRds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, identifier: &str, dbi_resource_id: &str, backups: &[&str]) -> Self {
        self.instances.push(DbInstance {
            identifier: identifier.to_string(),
            dbi_resource_id: dbi_resource_id.to_string(),
        });
        self.backups.insert(
            dbi_resource_id.to_string(),
            backups.iter().map(|b| b.to_string()).collect(),
        );
        self
    }

    pub fn failing_describe(mut self) -> Self {
        self.fail_describe = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl RdsApi for RecordingRds {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstance>, ResetError> {
        if self.fail_describe {
            return Err(ResetError::pre_task("rds", "DescribeDBInstances denied"));
        }
        Ok(self.instances.clone())
    }

    async fn disable_backup_retention(&self, identifier: &str) -> Result<(), ResetError> {
        self.record(format!("modify:{}", identifier));
        Ok(())
    }

    async fn describe_automated_backups(
        &self,
        dbi_resource_id: &str,
    ) -> Result<Vec<String>, ResetError> {
        Ok(self.backups.get(dbi_resource_id).cloned().unwrap_or_default())
    }

    async fn delete_automated_backup(&self, dbi_resource_id: &str) -> Result<(), ResetError> {
        self.record(format!("delete-backup:{}", dbi_resource_id));
        if self.fail_delete {
            return Err(ResetError::pre_task("rds", "backup is already being deleted"));
        }
        Ok(())
    }
}

/// In-memory Athena that records every mutating call.
#[derive(Default)]
pub struct RecordingAthena {
    work_groups: Vec<String>,
    named_queries: Vec<String>,
    fail_work_group_delete: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingAthena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_groups(mut self, names: &[&str]) -> Self {
        self.work_groups = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_named_queries(mut self, ids: &[&str]) -> Self {
        self.named_queries = ids.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn failing_work_group_delete(mut self) -> Self {
        self.fail_work_group_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl AthenaApi for RecordingAthena {
    async fn list_work_groups(&self, max_results: i32) -> Result<Vec<String>, ResetError> {
        Ok(self
            .work_groups
            .iter()
            .take(max_results.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_work_group(&self, name: &str) -> Result<(), ResetError> {
        self.record(format!("delete-workgroup:{}", name));
        if self.fail_work_group_delete {
            return Err(ResetError::pre_task("athena", "workgroup is busy"));
        }
        Ok(())
    }

    async fn list_named_queries(&self) -> Result<Vec<String>, ResetError> {
        Ok(self.named_queries.clone())
    }

    async fn delete_named_query(&self, id: &str) -> Result<(), ResetError> {
        self.record(format!("delete-query:{}", id));
        Ok(())
    }
}
