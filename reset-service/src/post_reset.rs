use lease_service::models::{AccountStatus, LeaseStatusReason};
use lease_service::services::metrics::record_lease_transition;
use lease_service::services::store::{AccountWriter, LeaseReader, LeaseWriter, RecordStore};
use service_core::error::{AppError, MultiError};
use tracing::instrument;

/// Returns a cleaned account to the pool: reset-locked leases are unlocked
/// and the account goes back to Ready. `now` stamps every change.
#[instrument(skip(store))]
pub async fn update_db_post_reset(
    store: &dyn RecordStore,
    account_id: &str,
    now: i64,
) -> Result<(), AppError> {
    let leases = store.list_leases_by_account(account_id).await?;

    let mut errors = Vec::new();
    for lease in leases {
        let Some(target) = lease.status.reset_unlock_target() else {
            continue;
        };
        match store
            .transition_lease_status(
                &lease.account_id,
                &lease.principal_id,
                lease.status,
                target,
                LeaseStatusReason::Active,
                now,
            )
            .await
        {
            Ok(_) => {
                record_lease_transition(lease.status, target, LeaseStatusReason::Active);
                tracing::info!(lease = %lease.log_id(), from = %lease.status, to = %target, "Unlocked lease");
            }
            Err(e) => errors.push(e),
        }
    }
    MultiError::collect("Failed to unlock leases after reset", errors)?;

    match store
        .transition_account_status(account_id, AccountStatus::NotReady, AccountStatus::Ready, now)
        .await
    {
        Ok(_) => {
            tracing::info!("Account returned to the pool");
            Ok(())
        }
        Err(AppError::Conflict(e)) => {
            tracing::info!(reason = %e, "Account was not NotReady, leaving its status alone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
