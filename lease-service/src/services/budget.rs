//! Spend calculation and budget-driven lease transitions.

use crate::config::LeasePolicy;
use crate::models::{
    start_of_day, Account, Lease, LeaseQuery, LeaseStatus, LeaseStatusReason, Usage,
};
use crate::services::clock::Clock;
use crate::services::metrics::record_lease_transition;
use crate::services::notification::BudgetNotifier;
use crate::services::providers::{CredentialProvider, EventPublisher, WorkQueue};
use crate::services::store::{AccountReader, LeaseReader, LeaseWriter, RecordStore, UsageStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use service_core::error::{AppError, MultiError};
use std::sync::Arc;
use tracing::instrument;

/// Page size used when sweeping every Active lease.
pub const SWEEP_PAGE_SIZE: i64 = 500;

pub const SWEEP_FAILURE_MESSAGE: &str = "Failed to check budgets for some leases";

/// Outcome of one budget check across every Active lease.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BudgetSweep {
    pub checked: usize,
    pub failed: Vec<String>,
}

impl BudgetSweep {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Highest threshold (percent of `budget_amount`) reached by `actual_spend`,
/// or 0 when none is.
pub fn determine_threshold_percentile(thresholds: &[f64], budget_amount: f64, actual_spend: f64) -> f64 {
    let mut sorted = thresholds.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
        .into_iter()
        .rev()
        .find(|p| actual_spend >= budget_amount * p / 100.0)
        .unwrap_or(0.0)
}

/// Decides whether a lease must end, and why. Expiry beats lease budget,
/// which beats principal budget.
pub fn is_lease_expired(
    lease: &Lease,
    now: DateTime<Utc>,
    actual_spend: f64,
    principal_spend: f64,
    principal_budget_amount: f64,
) -> (bool, LeaseStatusReason) {
    if now.timestamp() >= lease.expires_on {
        (true, LeaseStatusReason::Expired)
    } else if actual_spend >= lease.budget_amount {
        (true, LeaseStatusReason::OverBudget)
    } else if principal_spend > principal_budget_amount {
        (true, LeaseStatusReason::OverPrincipalBudget)
    } else {
        (false, LeaseStatusReason::Active)
    }
}

pub struct BudgetEvaluator {
    store: Arc<dyn RecordStore>,
    credentials: Arc<dyn CredentialProvider>,
    reset_queue: Arc<dyn WorkQueue>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<BudgetNotifier>,
    policy: LeasePolicy,
    lease_locked_topic_arn: String,
    clock: Arc<dyn Clock>,
}

impl BudgetEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialProvider>,
        reset_queue: Arc<dyn WorkQueue>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<BudgetNotifier>,
        policy: LeasePolicy,
        lease_locked_topic_arn: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            reset_queue,
            publisher,
            notifier,
            policy,
            lease_locked_topic_arn,
            clock,
        }
    }

    /// Spend on the lease since its status last changed, including today.
    ///
    /// Today's figure comes from the account's cost report and is cached as
    /// a usage row; earlier days come from the cache.
    #[instrument(skip(self, account, lease), fields(lease = %lease.log_id()))]
    pub async fn calculate_spend(&self, account: &Account, lease: &Lease) -> Result<f64, AppError> {
        let session = self
            .credentials
            .assume_role(&account.admin_role_arn, &format!("DCEBudgetCheck{}", account.id))
            .await?;

        let today = start_of_day(self.clock.now());
        let tomorrow = today + Duration::days(1);
        let today_spend = session
            .cost
            .calculate_total_spend(today.timestamp(), tomorrow.timestamp())
            .await?;

        self.store
            .put_usage(&Usage::for_day(
                &lease.principal_id,
                &lease.account_id,
                today,
                today_spend,
                self.policy.usage_ttl_days,
            ))
            .await?;

        let since = DateTime::<Utc>::from_timestamp(lease.status_modified_on, 0)
            .map(start_of_day)
            .unwrap_or(today);
        let yesterday_end = today.timestamp() - 1;
        let cached: f64 = if since.timestamp() <= yesterday_end {
            self.store
                .usage_by_date_range(since.timestamp(), yesterday_end)
                .await?
                .iter()
                .filter(|u| u.principal_id == lease.principal_id && u.account_id == lease.account_id)
                .map(|u| u.cost_amount)
                .sum()
        } else {
            0.0
        };

        let spend = cached + today_spend;
        tracing::info!(
            spend,
            budget = lease.budget_amount,
            "Lease has spent {:.2} of its {:.2} budget",
            spend,
            lease.budget_amount
        );
        Ok(spend)
    }

    /// Principal's spend across all accounts for the current billing period.
    pub async fn calculate_principal_spend(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<f64, AppError> {
        let start = self.policy.principal_budget_period.beginning_of_current(now);
        let end = start_of_day(now) + Duration::days(1) - Duration::seconds(1);
        let rows = self
            .store
            .usage_by_date_range(start.timestamp(), end.timestamp())
            .await?;
        Ok(rows
            .iter()
            .filter(|u| u.principal_id == principal_id)
            .map(|u| u.cost_amount)
            .sum())
    }

    /// Runs one budget check: ends the lease when expired or over budget and
    /// notifies recipients when a threshold is crossed.
    #[instrument(skip(self, lease), fields(lease = %lease.log_id()))]
    pub async fn check_budget(&self, lease: &Lease) -> Result<(), AppError> {
        let account = self
            .store
            .get_account(&lease.account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("account \"{}\" not found", lease.account_id))
            })?;

        let actual_spend = self.calculate_spend(&account, lease).await?;
        let now = self.clock.now();
        let principal_spend = self.calculate_principal_spend(&lease.principal_id, now).await?;

        let mut errors = Vec::new();

        let (expired, reason) = is_lease_expired(
            lease,
            now,
            actual_spend,
            principal_spend,
            self.policy.principal_budget_amount,
        );
        // Inactive leases have already released their account.
        if expired && lease.status.is_live() {
            tracing::info!(reason = %reason, "Lease has ended, locking");
            match self
                .store
                .transition_lease_status(
                    &lease.account_id,
                    &lease.principal_id,
                    lease.status,
                    LeaseStatus::Inactive,
                    reason,
                    now.timestamp(),
                )
                .await
            {
                Ok(updated) => {
                    record_lease_transition(lease.status, LeaseStatus::Inactive, reason);
                    if lease.status == LeaseStatus::Active {
                        if let Err(e) = self.publish_locked(&updated).await {
                            errors.push(e);
                        }
                    }
                }
                Err(e) => errors.push(e),
            }

            if let Err(e) = self.reset_queue.send_message(&lease.account_id).await {
                errors.push(e);
            }
        }

        let thresholds = self.notifier.threshold_percentiles();
        let lease_threshold =
            determine_threshold_percentile(thresholds, lease.budget_amount, actual_spend);
        let (threshold, spend) = if lease_threshold > 0.0 {
            (lease_threshold, actual_spend)
        } else {
            let principal_threshold = determine_threshold_percentile(
                thresholds,
                self.policy.principal_budget_amount,
                principal_spend,
            );
            (principal_threshold, principal_spend)
        };
        if let Err(e) = self.notifier.notify(lease, spend, threshold).await {
            tracing::warn!(error = %e, "Budget notification failed");
            errors.push(e);
        }

        MultiError::collect("Budget check failed", errors)
    }

    /// Runs `check_budget` on every Active lease. A failing lease is logged
    /// and recorded, and the sweep moves on to the next one.
    ///
    /// Always returns the sweep so far; the error is set when anything failed.
    #[instrument(skip(self))]
    pub async fn check_active_leases(&self) -> (BudgetSweep, Option<AppError>) {
        let mut sweep = BudgetSweep::default();
        let leases = match self.active_leases().await {
            Ok(leases) => leases,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list Active leases");
                return (sweep, Some(e));
            }
        };

        let mut errors = Vec::new();
        for lease in &leases {
            sweep.checked += 1;
            if let Err(e) = self.check_budget(lease).await {
                tracing::error!(lease = %lease.log_id(), error = %e, "Budget check failed");
                sweep.failed.push(lease.id.clone());
                errors.push(e);
            }
        }
        tracing::info!(
            checked = sweep.checked,
            failed = sweep.failed.len(),
            "Budget sweep finished"
        );

        (sweep, MultiError::collect(SWEEP_FAILURE_MESSAGE, errors).err())
    }

    async fn active_leases(&self) -> Result<Vec<Lease>, AppError> {
        let mut query = LeaseQuery {
            status: Some(LeaseStatus::Active),
            limit: Some(SWEEP_PAGE_SIZE),
            ..Default::default()
        };
        let mut leases = Vec::new();
        loop {
            let page = self.store.list_leases(&query).await?;
            leases.extend(page.leases);
            if page.next_account_id.is_none() {
                return Ok(leases);
            }
            query.next_account_id = page.next_account_id;
            query.next_principal_id = page.next_principal_id;
        }
    }

    async fn publish_locked(&self, lease: &Lease) -> Result<(), AppError> {
        let body = serde_json::to_string(lease).map_err(|e| AppError::InternalError(e.into()))?;
        self.publisher
            .publish_message(&self.lease_locked_topic_arn, &body, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn lease(budget: f64, expires_on: i64) -> Lease {
        Lease {
            id: "l".to_string(),
            account_id: "123456789012".to_string(),
            principal_id: "alice".to_string(),
            status: LeaseStatus::Active,
            status_reason: LeaseStatusReason::Active,
            created_on: 0,
            last_modified_on: 0,
            status_modified_on: 0,
            budget_amount: budget,
            budget_currency: "USD".to_string(),
            budget_notification_emails: vec![],
            expires_on,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_threshold_percentile() {
        assert_eq!(determine_threshold_percentile(&[75.0, 100.0], 100.0, 76.0), 75.0);
        assert_eq!(determine_threshold_percentile(&[75.0, 100.0], 100.0, 100.0), 100.0);
        assert_eq!(determine_threshold_percentile(&[75.0, 100.0], 100.0, 50.0), 0.0);
        assert_eq!(determine_threshold_percentile(&[100.0, 50.0, 75.0], 200.0, 160.0), 75.0);
        assert_eq!(determine_threshold_percentile(&[], 100.0, 500.0), 0.0);
    }

    #[test]
    fn test_is_lease_expired_precedence() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let past = now.timestamp() - 1;
        let future = now.timestamp() + 86_400;

        assert_eq!(
            is_lease_expired(&lease(100.0, past), now, 500.0, 5000.0, 1000.0),
            (true, LeaseStatusReason::Expired)
        );
        assert_eq!(
            is_lease_expired(&lease(100.0, now.timestamp()), now, 0.0, 0.0, 1000.0),
            (true, LeaseStatusReason::Expired)
        );
        assert_eq!(
            is_lease_expired(&lease(100.0, future), now, 100.0, 5000.0, 1000.0),
            (true, LeaseStatusReason::OverBudget)
        );
        assert_eq!(
            is_lease_expired(&lease(100.0, future), now, 10.0, 1000.01, 1000.0),
            (true, LeaseStatusReason::OverPrincipalBudget)
        );
        assert_eq!(
            is_lease_expired(&lease(100.0, future), now, 10.0, 1000.0, 1000.0),
            (false, LeaseStatusReason::Active)
        );
    }
}
