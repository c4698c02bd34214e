//! Lease lifecycle: create, read, end, and account orphaning.

use crate::config::LeasePolicy;
use crate::models::{
    end_of_day, validate_account_id, Account, AccountStatus, CreateLease, Lease, LeasePage,
    LeaseQuery, LeaseStatus, LeaseStatusReason,
};
use crate::services::clock::Clock;
use crate::services::metrics::record_lease_transition;
use crate::services::providers::{EventPublisher, WorkQueue};
use crate::services::store::{
    principal_has_lease, AccountReader, AccountWriter, LeaseReader, LeaseWriter, RecordStore,
    UsageStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use service_core::error::{AppError, MultiError};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Lease lifecycle event published to the events topic.
#[derive(Debug, Serialize)]
struct LeaseEvent<'a> {
    event: &'static str,
    lease: &'a Lease,
}

pub struct LeaseService {
    store: Arc<dyn RecordStore>,
    reset_queue: Arc<dyn WorkQueue>,
    publisher: Arc<dyn EventPublisher>,
    policy: LeasePolicy,
    lease_events_topic_arn: String,
    clock: Arc<dyn Clock>,
}

impl LeaseService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        reset_queue: Arc<dyn WorkQueue>,
        publisher: Arc<dyn EventPublisher>,
        policy: LeasePolicy,
        lease_events_topic_arn: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            reset_queue,
            publisher,
            policy,
            lease_events_topic_arn,
            clock,
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Applies the creation rules in order, stopping at the first failure.
    /// Returns the effective expiry.
    pub async fn validate_lease_rules(
        &self,
        principal_id: &str,
        budget_amount: f64,
        expires_on: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        if principal_id.trim().is_empty() {
            return Err(AppError::Validation(
                "invalid request parameters: missing principal_id".to_string(),
            ));
        }

        let now_ts = now.timestamp();
        if let Some(expires_on) = expires_on {
            if expires_on <= now_ts {
                return Err(AppError::Validation(format!(
                    "Requested lease has a desired expiry date less than today: {}",
                    expires_on
                )));
            }
        }

        if budget_amount > self.policy.max_lease_budget_amount {
            return Err(AppError::Validation(format!(
                "Requested lease has a budget amount of {:.2}, which is greater than max lease budget amount of {:.2}",
                budget_amount, self.policy.max_lease_budget_amount
            )));
        }

        let max_expiry = now_ts + self.policy.max_lease_period;
        if let Some(expires_on) = expires_on {
            if expires_on > max_expiry {
                return Err(AppError::Validation(format!(
                    "Requested lease has a budget expires on of {}, which is greater than max lease period of {}",
                    expires_on, max_expiry
                )));
            }
        }

        let period_start = self.policy.principal_budget_period.beginning_of_current(now);
        let spent: f64 = self
            .store
            .usage_by_date_range(period_start.timestamp(), end_of_day(now).timestamp())
            .await?
            .iter()
            .filter(|u| u.principal_id == principal_id)
            .map(|u| u.cost_amount)
            .sum();
        if spent > self.policy.principal_budget_amount {
            return Err(AppError::Validation(format!(
                "Unable to create lease: User principal {} has already spent {:.2} of their {:.2} principal budget",
                principal_id, spent, self.policy.principal_budget_amount
            )));
        }

        Ok(expires_on
            .unwrap_or_else(|| (now + Duration::days(self.policy.default_lease_length_in_days)).timestamp()))
    }

    #[instrument(skip(self, request))]
    pub async fn create(&self, request: CreateLease) -> Result<Lease, AppError> {
        request.validate_create_request()?;

        let principal_id = request.principal_id.clone().unwrap_or_default();
        let now = self.clock.now();
        let expires_on = self
            .validate_lease_rules(&principal_id, request.budget_amount, request.expires_on, now)
            .await?;

        let existing = self.store.list_leases_by_principal(&principal_id).await?;
        if existing.iter().any(|l| l.status.is_live()) {
            return Err(principal_has_lease(&principal_id));
        }

        let account = self.resolve_account(request.account_id.as_deref()).await?;

        let now_ts = now.timestamp();
        let lease = Lease {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            principal_id,
            status: LeaseStatus::Active,
            status_reason: LeaseStatusReason::Active,
            created_on: now_ts,
            last_modified_on: now_ts,
            status_modified_on: now_ts,
            budget_amount: request.budget_amount,
            budget_currency: request.budget_currency.unwrap_or_else(|| "USD".to_string()),
            budget_notification_emails: request.budget_notification_emails,
            expires_on,
            metadata: request.metadata,
        };
        // A concurrent create for the same principal loses here.
        self.store.create_lease(&lease).await?;

        if let Err(e) = self
            .store
            .transition_account_status(
                &account.id,
                AccountStatus::Ready,
                AccountStatus::Leased,
                now_ts,
            )
            .await
        {
            tracing::warn!(account_id = %account.id, error = %e, "Account assignment failed, rolling back lease");
            if let Err(rollback) = self
                .store
                .transition_lease_status(
                    &lease.account_id,
                    &lease.principal_id,
                    LeaseStatus::Active,
                    LeaseStatus::Inactive,
                    LeaseStatusReason::RolledBack,
                    self.clock.now().timestamp(),
                )
                .await
            {
                tracing::error!(lease = %lease.log_id(), error = %rollback, "Lease rollback failed");
            }
            return Err(e);
        }

        tracing::info!(lease_id = %lease.id, lease = %lease.log_id(), "Lease created");
        if let Err(e) = self.publish_event("lease-created", &lease).await {
            tracing::warn!(lease_id = %lease.id, error = %e, "Failed to publish lease-created event");
        }
        Ok(lease)
    }

    async fn resolve_account(&self, account_id: Option<&str>) -> Result<Account, AppError> {
        match account_id {
            Some(id) => self.store.get_account(id).await?.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("account \"{}\" not found", id))
            }),
            None => self
                .store
                .list_accounts_by_status(AccountStatus::Ready)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AppError::ServiceUnavailable("No Available accounts at this moment".to_string())
                }),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Lease, AppError> {
        self.store
            .get_lease(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("lease \"{}\" not found", id)))
    }

    pub async fn list(&self, query: &LeaseQuery) -> Result<LeasePage, AppError> {
        if query.id.is_some() {
            return Err(AppError::Validation(
                "lease validation error: id cannot be used to list leases".to_string(),
            ));
        }
        if let Some(account_id) = &query.account_id {
            validate_account_id(account_id)?;
        }
        self.store.list_leases(query).await
    }

    /// Ends an Active lease and queues its account for reset.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str, reason: LeaseStatusReason) -> Result<Lease, AppError> {
        let lease = self.get(id).await?;
        if lease.status != LeaseStatus::Active {
            return Err(AppError::Conflict(anyhow::anyhow!("lease \"{}\" is not active", id)));
        }

        let updated = self
            .store
            .transition_lease_status(
                &lease.account_id,
                &lease.principal_id,
                LeaseStatus::Active,
                LeaseStatus::Inactive,
                reason,
                self.clock.now().timestamp(),
            )
            .await?;
        record_lease_transition(LeaseStatus::Active, LeaseStatus::Inactive, reason);
        tracing::info!(lease_id = %id, reason = %reason, "Lease ended");

        self.reset_queue
            .send_message(&updated.account_id)
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "lease \"{}\" ended but account {} was not queued for reset: {}",
                    id,
                    updated.account_id,
                    e
                ))
            })?;

        self.publish_event("lease-ended", &updated).await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "lease \"{}\" ended but the lease-ended event failed: {}",
                id,
                e
            ))
        })?;

        Ok(updated)
    }

    /// Marks an account Orphaned and ends every Active lease on it.
    #[instrument(skip(self))]
    pub async fn orphan_account(&self, account_id: &str) -> Result<Account, AppError> {
        let account = self.store.get_account(account_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("account \"{}\" not found", account_id))
        })?;

        let orphaned = if account.status == AccountStatus::Orphaned {
            account
        } else {
            self.store
                .transition_account_status(
                    account_id,
                    account.status,
                    AccountStatus::Orphaned,
                    self.clock.now().timestamp(),
                )
                .await?
        };
        tracing::warn!(account_id = %account_id, "Account orphaned");

        let mut errors = Vec::new();
        for lease in self.store.list_leases_by_account(account_id).await? {
            if lease.status != LeaseStatus::Active {
                continue;
            }
            match self
                .store
                .transition_lease_status(
                    &lease.account_id,
                    &lease.principal_id,
                    LeaseStatus::Active,
                    LeaseStatus::Inactive,
                    LeaseStatusReason::AccountOrphaned,
                    self.clock.now().timestamp(),
                )
                .await
            {
                Ok(_) => record_lease_transition(
                    LeaseStatus::Active,
                    LeaseStatus::Inactive,
                    LeaseStatusReason::AccountOrphaned,
                ),
                Err(e) => errors.push(e),
            }
        }

        MultiError::collect(
            format!("Failed to end leases for orphaned account {}", account_id),
            errors,
        )?;
        Ok(orphaned)
    }

    async fn publish_event(&self, event: &'static str, lease: &Lease) -> Result<(), AppError> {
        let body = serde_json::to_string(&LeaseEvent { event, lease })
            .map_err(|e| AppError::InternalError(e.into()))?;
        self.publisher
            .publish_message(&self.lease_events_topic_arn, &body, true)
            .await
    }
}
