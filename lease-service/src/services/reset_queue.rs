//! Drains the reset queue: locks each account's leases and starts its reset build.

use crate::models::{AccountStatus, LeaseStatus, ResetOutput, ResetResult};
use crate::services::clock::Clock;
use crate::services::metrics::{record_drain_account, record_lease_transition};
use crate::services::providers::{BuildTrigger, QueueMessage, WorkQueue};
use crate::services::store::{
    AccountReader, AccountWriter, LeaseReader, LeaseWriter, RecordStore,
};
use service_core::error::{AppError, MultiError};
use std::sync::Arc;
use tracing::instrument;

/// SQS caps a single receive at ten messages.
pub const RECEIVE_BATCH_SIZE: i32 = 10;

pub const DRAIN_FAILURE_MESSAGE: &str = "Could not successfully trigger a reset on all accounts";

pub struct ResetQueueDrainer {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn WorkQueue>,
    builds: Arc<dyn BuildTrigger>,
    reset_build_name: String,
    clock: Arc<dyn Clock>,
}

impl ResetQueueDrainer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn WorkQueue>,
        builds: Arc<dyn BuildTrigger>,
        reset_build_name: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            builds,
            reset_build_name,
            clock,
        }
    }

    /// Processes the queue until a receive comes back empty.
    ///
    /// Always returns the per-account outcomes seen so far; the error is set
    /// when anything failed.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> (ResetOutput, Option<AppError>) {
        let mut output = ResetOutput::started();
        let mut errors = Vec::new();

        loop {
            let messages = match self.queue.receive_messages(RECEIVE_BATCH_SIZE).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive reset queue messages");
                    output.success = false;
                    errors.push(e);
                    break;
                }
            };
            if messages.is_empty() {
                break;
            }

            for message in messages {
                let account_id = message.body.trim().to_string();
                let (result, error) = self.process_message(&account_id, &message).await;
                record_drain_account(if result.is_complete() { "reset" } else { "failed" });
                output.record(&account_id, result);
                if let Some(e) = error {
                    tracing::warn!(account_id = %account_id, error = %e, "Reset trigger failed");
                    errors.push(e);
                }
            }
        }

        tracing::info!(
            accounts = output.accounts.len(),
            success = output.success,
            "Reset queue drained"
        );
        let error = MultiError::collect(DRAIN_FAILURE_MESSAGE, errors).err();
        (output, error)
    }

    async fn process_message(
        &self,
        account_id: &str,
        message: &QueueMessage,
    ) -> (ResetResult, Option<AppError>) {
        let env = match self.begin_reclamation(account_id).await {
            Ok(env) => env,
            Err(e) => return (ResetResult::failed(), Some(e)),
        };

        if let Err(e) = self.builds.start_build(&self.reset_build_name, &env).await {
            return (ResetResult::failed(), Some(e));
        }

        match self.queue.delete_message(&message.receipt_handle).await {
            Ok(()) => (
                ResetResult {
                    build_trigger: true,
                    message_deletion: true,
                },
                None,
            ),
            Err(e) => (
                ResetResult {
                    build_trigger: true,
                    message_deletion: false,
                },
                Some(e),
            ),
        }
    }

    /// Moves the account out of `Leased` and reset-locks its live leases.
    /// Returns the build environment for the reset job.
    async fn begin_reclamation(&self, account_id: &str) -> Result<Vec<(String, String)>, AppError> {
        let account = self.store.get_account(account_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("account \"{}\" not found", account_id))
        })?;
        let admin_role_name = account.admin_role_name()?;
        let principal_role_name = account.principal_role_name()?;

        match self
            .store
            .transition_account_status(
                account_id,
                AccountStatus::Leased,
                AccountStatus::NotReady,
                self.clock.now().timestamp(),
            )
            .await
        {
            Ok(_) => tracing::info!(account_id = %account_id, "Account moved to NotReady"),
            Err(e) if e.is_conflict() => {
                tracing::debug!(account_id = %account_id, status = %account.status, "Account not Leased, leaving status")
            }
            Err(e) => return Err(e),
        }

        for lease in self.store.list_leases_by_account(account_id).await? {
            let Some(target) = lease.status.reset_lock_target() else {
                continue;
            };
            match self
                .store
                .transition_lease_status(
                    &lease.account_id,
                    &lease.principal_id,
                    lease.status,
                    target,
                    lease.status_reason,
                    self.clock.now().timestamp(),
                )
                .await
            {
                Ok(_) => record_lease_transition(lease.status, target, lease.status_reason),
                Err(e) if e.is_conflict() && self.already_locked(&lease.id, target).await => {
                    tracing::debug!(lease_id = %lease.id, "Lease already reset-locked");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(vec![
            ("RESET_ACCOUNT".to_string(), account_id.to_string()),
            ("RESET_ACCOUNT_ADMIN_ROLE_NAME".to_string(), admin_role_name),
            ("RESET_ACCOUNT_PRINCIPAL_ROLE_NAME".to_string(), principal_role_name),
        ])
    }

    async fn already_locked(&self, lease_id: &str, target: LeaseStatus) -> bool {
        matches!(
            self.store.get_lease(lease_id).await,
            Ok(Some(lease)) if lease.status == target
        )
    }

    /// Queues every NotReady account for reset. Returns how many were queued.
    #[instrument(skip(self))]
    pub async fn populate_reset_queue(&self) -> Result<usize, AppError> {
        let accounts = self
            .store
            .list_accounts_by_status(AccountStatus::NotReady)
            .await?;

        let mut queued = 0;
        let mut errors = Vec::new();
        for account in accounts {
            match self.queue.send_message(&account.id).await {
                Ok(()) => queued += 1,
                Err(e) => errors.push(e),
            }
        }
        tracing::info!(queued, failed = errors.len(), "Populated reset queue");

        MultiError::collect("Failed to queue some accounts for reset", errors)?;
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Lease, LeaseStatusReason};
    use crate::services::providers::{MemoryQueue, RecordingBuildTrigger};
    use crate::services::clock::SystemClock;
    use crate::services::store::MemoryStore;
    use std::collections::HashMap;

    const ACCOUNTS: [&str; 5] = [
        "100000000001",
        "100000000002",
        "100000000003",
        "100000000004",
        "100000000005",
    ];

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        builds: Arc<RecordingBuildTrigger>,
        drainer: ResetQueueDrainer,
    }

    fn account(id: &str, status: AccountStatus) -> Account {
        Account {
            id: id.to_string(),
            status,
            admin_role_arn: format!("arn:aws:iam::{}:role/AdminRole", id),
            principal_role_arn: format!("arn:aws:iam::{}:role/team/PrincipalRole", id),
            principal_policy_hash: String::new(),
            created_on: 0,
            last_modified_on: 0,
            metadata: HashMap::new(),
        }
    }

    fn lease(account_id: &str, principal_id: &str, status: LeaseStatus) -> Lease {
        Lease {
            id: format!("{}-{}", account_id, principal_id),
            account_id: account_id.to_string(),
            principal_id: principal_id.to_string(),
            status,
            status_reason: LeaseStatusReason::Active,
            created_on: 0,
            last_modified_on: 0,
            status_modified_on: 0,
            budget_amount: 100.0,
            budget_currency: "USD".to_string(),
            budget_notification_emails: vec![],
            expires_on: i64::MAX,
            metadata: HashMap::new(),
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let builds = Arc::new(RecordingBuildTrigger::new());
        let drainer = ResetQueueDrainer::new(
            store.clone(),
            queue.clone(),
            builds.clone(),
            "ResetCodeBuild".to_string(),
            Arc::new(SystemClock),
        );
        Fixture {
            store,
            queue,
            builds,
            drainer,
        }
    }

    #[tokio::test]
    async fn test_drain_continues_past_failed_account() {
        let f = fixture();
        for id in ACCOUNTS {
            if id != ACCOUNTS[2] {
                f.store.put_account(&account(id, AccountStatus::Leased)).await.unwrap();
            }
        }
        f.queue.seed(ACCOUNTS);

        let (output, error) = f.drainer.drain().await;

        assert!(!output.success);
        assert_eq!(output.accounts.len(), 5);
        assert_eq!(output.accounts[ACCOUNTS[2]], ResetResult::failed());
        for id in [ACCOUNTS[0], ACCOUNTS[1], ACCOUNTS[3], ACCOUNTS[4]] {
            assert!(output.accounts[id].is_complete());
            let stored = f.store.get_account(id).await.unwrap().unwrap();
            assert_eq!(stored.status, AccountStatus::NotReady);
        }
        assert_eq!(f.builds.accounts().len(), 4);
        assert_eq!(f.queue.deleted().len(), 4);
        // The failed message stays on the queue for redelivery.
        assert_eq!(f.queue.in_flight_len(), 1);

        let error = error.expect("drain should report the failure");
        assert!(error.to_string().starts_with(DRAIN_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_drain_locks_live_leases_and_passes_role_names() {
        let f = fixture();
        let id = ACCOUNTS[0];
        f.store.put_account(&account(id, AccountStatus::Leased)).await.unwrap();
        f.store.put_lease(&lease(id, "alice", LeaseStatus::Active)).await.unwrap();
        f.store.put_lease(&lease(id, "bob", LeaseStatus::FinanceLock)).await.unwrap();
        f.store.put_lease(&lease(id, "carol", LeaseStatus::Inactive)).await.unwrap();
        f.queue.seed([id]);

        let (output, error) = f.drainer.drain().await;
        assert!(error.is_none());
        assert!(output.success);

        let statuses: HashMap<String, LeaseStatus> = f
            .store
            .list_leases_by_account(id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| (l.principal_id, l.status))
            .collect();
        assert_eq!(statuses["alice"], LeaseStatus::ResetLock);
        assert_eq!(statuses["bob"], LeaseStatus::ResetFinanceLock);
        assert_eq!(statuses["carol"], LeaseStatus::Inactive);

        let builds = f.builds.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].0, "ResetCodeBuild");
        assert_eq!(
            builds[0].1,
            vec![
                ("RESET_ACCOUNT".to_string(), id.to_string()),
                ("RESET_ACCOUNT_ADMIN_ROLE_NAME".to_string(), "AdminRole".to_string()),
                (
                    "RESET_ACCOUNT_PRINCIPAL_ROLE_NAME".to_string(),
                    "team/PrincipalRole".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_redelivered_message_is_processed_again() {
        let f = fixture();
        let id = ACCOUNTS[0];
        f.store.put_account(&account(id, AccountStatus::Leased)).await.unwrap();
        f.store.put_lease(&lease(id, "alice", LeaseStatus::Active)).await.unwrap();
        f.queue.seed([id]);
        f.queue.fail_delete_for(id);

        let (output, error) = f.drainer.drain().await;
        assert!(error.is_some());
        assert_eq!(
            output.accounts[id],
            ResetResult {
                build_trigger: true,
                message_deletion: false,
            }
        );

        // Second delivery finds the account NotReady and the lease already locked.
        f.queue.redeliver_in_flight();
        let (output, _) = f.drainer.drain().await;
        assert!(output.accounts[id].build_trigger);
        assert_eq!(f.builds.accounts(), vec![id.to_string(), id.to_string()]);
        let stored = f.store.get_lease(&format!("{}-alice", id)).await.unwrap().unwrap();
        assert_eq!(stored.status, LeaseStatus::ResetLock);
    }

    #[tokio::test]
    async fn test_build_failure_leaves_message_undeleted() {
        let f = fixture();
        let id = ACCOUNTS[0];
        f.store.put_account(&account(id, AccountStatus::Leased)).await.unwrap();
        f.queue.seed([id]);
        f.builds.fail_for(id);

        let (output, error) = f.drainer.drain().await;
        assert!(!output.success);
        assert_eq!(output.accounts[id], ResetResult::failed());
        assert!(error.is_some());
        assert!(f.queue.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_receive_failure_stops_drain() {
        let f = fixture();
        f.queue.seed([ACCOUNTS[0]]);
        f.queue.fail_receive(true);

        let (output, error) = f.drainer.drain().await;
        assert!(!output.success);
        assert!(output.accounts.is_empty());
        assert!(error.is_some());
        assert!(f.builds.builds().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_is_successful() {
        let f = fixture();
        let (output, error) = f.drainer.drain().await;
        assert!(output.success);
        assert!(output.accounts.is_empty());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_populate_queues_only_not_ready_accounts() {
        let f = fixture();
        f.store.put_account(&account(ACCOUNTS[0], AccountStatus::NotReady)).await.unwrap();
        f.store.put_account(&account(ACCOUNTS[1], AccountStatus::Ready)).await.unwrap();
        f.store.put_account(&account(ACCOUNTS[2], AccountStatus::NotReady)).await.unwrap();
        f.store.put_account(&account(ACCOUNTS[3], AccountStatus::Leased)).await.unwrap();

        let queued = f.drainer.populate_reset_queue().await.unwrap();
        assert_eq!(queued, 2);
        let mut sent = f.queue.sent();
        sent.sort();
        assert_eq!(sent, vec![ACCOUNTS[0].to_string(), ACCOUNTS[2].to_string()]);
    }

    #[tokio::test]
    async fn test_populate_reports_send_failures() {
        let f = fixture();
        f.store.put_account(&account(ACCOUNTS[0], AccountStatus::NotReady)).await.unwrap();
        f.store.put_account(&account(ACCOUNTS[1], AccountStatus::NotReady)).await.unwrap();
        f.queue.fail_send_for(ACCOUNTS[1]);

        assert!(f.drainer.populate_reset_queue().await.is_err());
        assert_eq!(f.queue.sent(), vec![ACCOUNTS[0].to_string()]);
    }
}
