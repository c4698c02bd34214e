use super::{
    account_conflict, lease_conflict, principal_has_lease, AccountReader, AccountWriter, LeaseReader, LeaseWriter,
    RecordStore, UsageStore,
};
use crate::models::{
    Account, AccountStatus, Lease, LeasePage, LeaseQuery, LeaseStatus, LeaseStatusReason, Usage,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type LeaseKey = (String, String);
type UsageKey = (String, String, i64);

/// In-process record store. Transitions check and set under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    leases: RwLock<BTreeMap<LeaseKey, Lease>>,
    accounts: RwLock<BTreeMap<String, Account>>,
    usage: RwLock<BTreeMap<UsageKey, Usage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lease_count(&self) -> usize {
        self.leases.read().await.len()
    }
}

#[async_trait]
impl LeaseReader for MemoryStore {
    async fn get_lease(&self, id: &str) -> Result<Option<Lease>, AppError> {
        let leases = self.leases.read().await;
        Ok(leases.values().find(|l| l.id == id).cloned())
    }

    async fn list_leases(&self, query: &LeaseQuery) -> Result<LeasePage, AppError> {
        let leases = self.leases.read().await;
        // BTreeMap iterates in (account_id, principal_id) order.
        let sorted: Vec<Lease> = leases
            .values()
            .filter(|l| query.matches(l) && query.after_cursor(l))
            .cloned()
            .collect();
        Ok(LeasePage::from_sorted(sorted, query.effective_limit()))
    }

    async fn list_leases_by_account(&self, account_id: &str) -> Result<Vec<Lease>, AppError> {
        let leases = self.leases.read().await;
        Ok(leases
            .values()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>, AppError> {
        let leases = self.leases.read().await;
        Ok(leases
            .values()
            .filter(|l| l.principal_id == principal_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LeaseWriter for MemoryStore {
    async fn put_lease(&self, lease: &Lease) -> Result<(), AppError> {
        let mut leases = self.leases.write().await;
        leases.insert(
            (lease.account_id.clone(), lease.principal_id.clone()),
            lease.clone(),
        );
        Ok(())
    }

    async fn create_lease(&self, lease: &Lease) -> Result<(), AppError> {
        let mut leases = self.leases.write().await;
        if leases
            .values()
            .any(|l| l.principal_id == lease.principal_id && l.status.is_live())
        {
            return Err(principal_has_lease(&lease.principal_id));
        }
        leases.insert(
            (lease.account_id.clone(), lease.principal_id.clone()),
            lease.clone(),
        );
        Ok(())
    }

    async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        from: LeaseStatus,
        to: LeaseStatus,
        reason: LeaseStatusReason,
        now: i64,
    ) -> Result<Lease, AppError> {
        let mut leases = self.leases.write().await;
        let key = (account_id.to_string(), principal_id.to_string());
        match leases.get_mut(&key) {
            Some(lease) if lease.status == from => {
                lease.status = to;
                lease.status_reason = reason;
                lease.last_modified_on = now;
                lease.status_modified_on = now;
                Ok(lease.clone())
            }
            _ => Err(lease_conflict(account_id, principal_id, from, to)),
        }
    }
}

#[async_trait]
impl AccountReader for MemoryStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn list_accounts_by_status(
        &self,
        status: AccountStatus,
    ) -> Result<Vec<Account>, AppError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountWriter for MemoryStore {
    async fn put_account(&self, account: &Account) -> Result<(), AppError> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn transition_account_status(
        &self,
        id: &str,
        from: AccountStatus,
        to: AccountStatus,
        now: i64,
    ) -> Result<Account, AppError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(id) {
            Some(account) if account.status == from => {
                account.status = to;
                account.last_modified_on = now;
                Ok(account.clone())
            }
            _ => Err(account_conflict(id, from, to)),
        }
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn put_usage(&self, usage: &Usage) -> Result<(), AppError> {
        let mut rows = self.usage.write().await;
        rows.insert(
            (
                usage.principal_id.clone(),
                usage.account_id.clone(),
                usage.start_date,
            ),
            usage.clone(),
        );
        Ok(())
    }

    async fn usage_by_date_range(&self, start: i64, end: i64) -> Result<Vec<Usage>, AppError> {
        let rows = self.usage.read().await;
        Ok(rows
            .values()
            .filter(|u| u.start_date >= start && u.start_date <= end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lease(account: &str, principal: &str, status: LeaseStatus) -> Lease {
        Lease {
            id: format!("lease-{}-{}", account, principal),
            account_id: account.to_string(),
            principal_id: principal.to_string(),
            status,
            status_reason: LeaseStatusReason::Active,
            created_on: 1,
            last_modified_on: 1,
            status_modified_on: 1,
            budget_amount: 100.0,
            budget_currency: "USD".to_string(),
            budget_notification_emails: vec![],
            expires_on: i64::MAX,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_transition_from_stale_status_is_conflict_and_does_not_mutate() {
        let store = MemoryStore::new();
        store
            .put_lease(&lease("111111111111", "alice", LeaseStatus::Inactive))
            .await
            .unwrap();

        let err = store
            .transition_lease_status(
                "111111111111",
                "alice",
                LeaseStatus::Active,
                LeaseStatus::ResetLock,
                LeaseStatusReason::Active,
                50,
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("no lease exists with Status=\"Active\""));

        let stored = store.get_lease("lease-111111111111-alice").await.unwrap().unwrap();
        assert_eq!(stored.status, LeaseStatus::Inactive);
        assert_eq!(stored.last_modified_on, 1);
    }

    #[tokio::test]
    async fn test_transition_refreshes_timestamps() {
        let store = MemoryStore::new();
        store
            .put_lease(&lease("111111111111", "alice", LeaseStatus::Active))
            .await
            .unwrap();

        let updated = store
            .transition_lease_status(
                "111111111111",
                "alice",
                LeaseStatus::Active,
                LeaseStatus::Inactive,
                LeaseStatusReason::Expired,
                1_715_774_400,
            )
            .await
            .unwrap();
        assert_eq!(updated.status, LeaseStatus::Inactive);
        assert_eq!(updated.status_reason, LeaseStatusReason::Expired);
        assert_eq!(updated.status_modified_on, 1_715_774_400);
        assert_eq!(updated.last_modified_on, 1_715_774_400);
    }

    #[tokio::test]
    async fn test_create_lease_refuses_principal_with_live_lease() {
        let store = MemoryStore::new();
        store
            .create_lease(&lease("111111111111", "alice", LeaseStatus::FinanceLock))
            .await
            .unwrap();

        let err = store
            .create_lease(&lease("222222222222", "alice", LeaseStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(store.lease_count().await, 1);

        store
            .create_lease(&lease("222222222222", "bob", LeaseStatus::Active))
            .await
            .unwrap();
        assert_eq!(store.lease_count().await, 2);
    }

    #[tokio::test]
    async fn test_create_lease_replaces_inactive_lease_on_same_account() {
        let store = MemoryStore::new();
        store
            .put_lease(&lease("111111111111", "alice", LeaseStatus::Inactive))
            .await
            .unwrap();

        let mut renewed = lease("111111111111", "alice", LeaseStatus::Active);
        renewed.id = "lease-renewed".to_string();
        store.create_lease(&renewed).await.unwrap();

        assert_eq!(store.lease_count().await, 1);
        let stored = store.get_lease("lease-renewed").await.unwrap().unwrap();
        assert_eq!(stored.status, LeaseStatus::Active);
    }

    #[tokio::test]
    async fn test_concurrent_creates_for_one_principal_admit_one() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let handles: Vec<_> = ["111111111111", "222222222222", "333333333333"]
            .into_iter()
            .map(|account| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .create_lease(&lease(account, "alice", LeaseStatus::Active))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_leases_by_principal("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_paginates_in_key_order() {
        let store = MemoryStore::new();
        for (account, principal) in [
            ("333333333333", "c"),
            ("111111111111", "a"),
            ("222222222222", "b"),
        ] {
            store
                .put_lease(&lease(account, principal, LeaseStatus::Active))
                .await
                .unwrap();
        }

        let first = store
            .list_leases(&LeaseQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.leases[0].account_id, "111111111111");
        assert_eq!(first.next_account_id.as_deref(), Some("333333333333"));

        let second = store
            .list_leases(&LeaseQuery {
                limit: Some(2),
                next_account_id: first.next_account_id,
                next_principal_id: first.next_principal_id,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.leases.len(), 1);
        assert_eq!(second.leases[0].principal_id, "c");
        assert!(second.next_account_id.is_none());
    }

    #[tokio::test]
    async fn test_usage_range_is_inclusive() {
        let store = MemoryStore::new();
        for day in 0..3 {
            store
                .put_usage(&Usage {
                    principal_id: "alice".to_string(),
                    account_id: "111111111111".to_string(),
                    start_date: day * 86_400,
                    end_date: day * 86_400 + 86_399,
                    cost_amount: 1.0,
                    cost_currency: "USD".to_string(),
                    time_to_live: 0,
                })
                .await
                .unwrap();
        }
        let rows = store.usage_by_date_range(86_400, 2 * 86_400).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
