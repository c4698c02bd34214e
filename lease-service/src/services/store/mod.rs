//! Record store seams for leases, accounts and cached usage.
//!
//! Every status change goes through a conditional transition guarded by the
//! expected prior status. Implementations must never read-modify-write.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::models::{
    Account, AccountStatus, Lease, LeasePage, LeaseQuery, LeaseStatus, LeaseStatusReason, Usage,
};
use async_trait::async_trait;
use service_core::error::AppError;

#[async_trait]
pub trait LeaseReader: Send + Sync {
    async fn get_lease(&self, id: &str) -> Result<Option<Lease>, AppError>;

    async fn list_leases(&self, query: &LeaseQuery) -> Result<LeasePage, AppError>;

    async fn list_leases_by_account(&self, account_id: &str) -> Result<Vec<Lease>, AppError>;

    async fn list_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>, AppError>;
}

#[async_trait]
pub trait LeaseWriter: Send + Sync {
    /// Inserts or replaces the lease stored under `(account_id, principal_id)`.
    async fn put_lease(&self, lease: &Lease) -> Result<(), AppError>;

    /// Stores a new lease only while its principal holds no live lease.
    /// Check and insert are one atomic step; a principal that already holds
    /// a live lease fails with `AlreadyExists`.
    async fn create_lease(&self, lease: &Lease) -> Result<(), AppError>;

    /// Moves a lease from `from` to `to`, failing with `Conflict` when the
    /// stored status is not `from`. `now` stamps the modification times.
    async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        from: LeaseStatus,
        to: LeaseStatus,
        reason: LeaseStatusReason,
        now: i64,
    ) -> Result<Lease, AppError>;
}

#[async_trait]
pub trait AccountReader: Send + Sync {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError>;

    async fn list_accounts_by_status(&self, status: AccountStatus)
        -> Result<Vec<Account>, AppError>;
}

#[async_trait]
pub trait AccountWriter: Send + Sync {
    async fn put_account(&self, account: &Account) -> Result<(), AppError>;

    async fn transition_account_status(
        &self,
        id: &str,
        from: AccountStatus,
        to: AccountStatus,
        now: i64,
    ) -> Result<Account, AppError>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn put_usage(&self, usage: &Usage) -> Result<(), AppError>;

    /// Usage rows whose `start_date` falls within `[start, end]`.
    async fn usage_by_date_range(&self, start: i64, end: i64) -> Result<Vec<Usage>, AppError>;
}

/// Everything a service needs from the record store.
#[async_trait]
pub trait RecordStore:
    LeaseReader + LeaseWriter + AccountReader + AccountWriter + UsageStore
{
    async fn health_check(&self) -> Result<(), AppError>;
}

pub fn principal_has_lease(principal_id: &str) -> AppError {
    AppError::AlreadyExists(anyhow::anyhow!(
        "lease for principal \"{}\" already exists",
        principal_id
    ))
}

pub(crate) fn lease_conflict(
    account_id: &str,
    principal_id: &str,
    from: LeaseStatus,
    to: LeaseStatus,
) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "unable to update lease status from \"{}\" to \"{}\" for {}/{}: no lease exists with Status=\"{}\"",
        from,
        to,
        account_id,
        principal_id,
        from
    ))
}

pub(crate) fn account_conflict(id: &str, from: AccountStatus, to: AccountStatus) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "unable to update account status from \"{}\" to \"{}\" for account {}: no account exists with Status=\"{}\"",
        from,
        to,
        id,
        from
    ))
}
