//! Lease model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

static ACCOUNT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{12}$").expect("account id pattern is valid"));

/// Lease status.
///
/// `Active` and `Inactive` are the terminal states; the lock variants freeze
/// a lease while its account is reclaimed or under billing review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseStatus {
    Active,
    Inactive,
    ResetLock,
    FinanceLock,
    ResetFinanceLock,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "Active",
            LeaseStatus::Inactive => "Inactive",
            LeaseStatus::ResetLock => "ResetLock",
            LeaseStatus::FinanceLock => "FinanceLock",
            LeaseStatus::ResetFinanceLock => "ResetFinanceLock",
        }
    }

    /// Everything except `Inactive` still holds the principal's claim.
    pub fn is_live(&self) -> bool {
        !matches!(self, LeaseStatus::Inactive)
    }

    /// Status a lease moves to when its account is queued for reset.
    pub fn reset_lock_target(&self) -> Option<LeaseStatus> {
        match self {
            LeaseStatus::Active => Some(LeaseStatus::ResetLock),
            LeaseStatus::FinanceLock => Some(LeaseStatus::ResetFinanceLock),
            _ => None,
        }
    }

    /// Status a reset-locked lease returns to once the account is clean.
    pub fn reset_unlock_target(&self) -> Option<LeaseStatus> {
        match self {
            LeaseStatus::ResetLock => Some(LeaseStatus::Active),
            LeaseStatus::ResetFinanceLock => Some(LeaseStatus::FinanceLock),
            _ => None,
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(LeaseStatus::Active),
            "Inactive" => Ok(LeaseStatus::Inactive),
            "ResetLock" => Ok(LeaseStatus::ResetLock),
            "FinanceLock" => Ok(LeaseStatus::FinanceLock),
            "ResetFinanceLock" => Ok(LeaseStatus::ResetFinanceLock),
            other => Err(AppError::Validation(format!(
                "lease validation error: unknown status {:?}",
                other
            ))),
        }
    }
}

/// Why a lease holds its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseStatusReason {
    Expired,
    OverBudget,
    OverPrincipalBudget,
    Destroyed,
    Active,
    RolledBack,
    AccountOrphaned,
}

impl LeaseStatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatusReason::Expired => "Expired",
            LeaseStatusReason::OverBudget => "OverBudget",
            LeaseStatusReason::OverPrincipalBudget => "OverPrincipalBudget",
            LeaseStatusReason::Destroyed => "Destroyed",
            LeaseStatusReason::Active => "Active",
            LeaseStatusReason::RolledBack => "RolledBack",
            LeaseStatusReason::AccountOrphaned => "AccountOrphaned",
        }
    }
}

impl fmt::Display for LeaseStatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStatusReason {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Expired" => Ok(LeaseStatusReason::Expired),
            "OverBudget" => Ok(LeaseStatusReason::OverBudget),
            "OverPrincipalBudget" => Ok(LeaseStatusReason::OverPrincipalBudget),
            "Destroyed" => Ok(LeaseStatusReason::Destroyed),
            "Active" => Ok(LeaseStatusReason::Active),
            "RolledBack" => Ok(LeaseStatusReason::RolledBack),
            "AccountOrphaned" => Ok(LeaseStatusReason::AccountOrphaned),
            other => Err(AppError::Validation(format!(
                "lease validation error: unknown status reason {:?}",
                other
            ))),
        }
    }
}

/// One principal's claim on one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub id: String,
    pub account_id: String,
    pub principal_id: String,
    pub status: LeaseStatus,
    pub status_reason: LeaseStatusReason,
    pub created_on: i64,
    pub last_modified_on: i64,
    pub status_modified_on: i64,
    pub budget_amount: f64,
    pub budget_currency: String,
    #[serde(default)]
    pub budget_notification_emails: Vec<String>,
    pub expires_on: i64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Lease {
    /// `principal @ account`, used in log lines.
    pub fn log_id(&self) -> String {
        format!("{} @ {}", self.principal_id, self.account_id)
    }
}

/// Body of a lease creation request.
///
/// Server-assigned fields are accepted only so they can be rejected with a
/// specific message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLease {
    pub id: Option<String>,
    pub status: Option<LeaseStatus>,
    pub status_reason: Option<LeaseStatusReason>,
    pub created_on: Option<i64>,
    pub last_modified_on: Option<i64>,
    pub status_modified_on: Option<i64>,
    pub account_id: Option<String>,
    pub principal_id: Option<String>,
    #[serde(default)]
    pub budget_amount: f64,
    pub budget_currency: Option<String>,
    #[serde(default)]
    pub budget_notification_emails: Vec<String>,
    pub expires_on: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CreateLease {
    /// Structural checks: server-assigned fields unset, identifiers well formed.
    pub fn validate_create_request(&self) -> Result<(), AppError> {
        let server_assigned = [
            ("id", self.id.is_some()),
            ("status", self.status.is_some()),
            ("status_reason", self.status_reason.is_some()),
            ("created_on", self.created_on.is_some()),
            ("last_modified_on", self.last_modified_on.is_some()),
            ("status_modified_on", self.status_modified_on.is_some()),
        ];
        if let Some((field, _)) = server_assigned.iter().find(|(_, set)| *set) {
            return Err(AppError::Validation(format!(
                "lease validation error: {} must be empty",
                field
            )));
        }

        if let Some(account_id) = &self.account_id {
            validate_account_id(account_id)?;
        }

        if !self.budget_amount.is_finite() || self.budget_amount < 0.0 {
            return Err(AppError::Validation(
                "lease validation error: budget_amount must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn validate_account_id(account_id: &str) -> Result<(), AppError> {
    if ACCOUNT_ID_RE.is_match(account_id) {
        Ok(())
    } else {
        Err(AppError::Validation(
            "lease validation error: account_id must be a 12 digit number".to_string(),
        ))
    }
}

/// Filter and cursor for listing leases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LeaseQuery {
    pub id: Option<String>,
    pub principal_id: Option<String>,
    pub account_id: Option<String>,
    pub status: Option<LeaseStatus>,
    pub next_account_id: Option<String>,
    pub next_principal_id: Option<String>,
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub limit: Option<i64>,
}

impl LeaseQuery {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn matches(&self, lease: &Lease) -> bool {
        self.principal_id
            .as_ref()
            .map_or(true, |p| *p == lease.principal_id)
            && self.account_id.as_ref().map_or(true, |a| *a == lease.account_id)
            && self.status.map_or(true, |s| s == lease.status)
    }

    /// Leases sort by `(account_id, principal_id)`; the cursor is inclusive.
    pub fn after_cursor(&self, lease: &Lease) -> bool {
        match (&self.next_account_id, &self.next_principal_id) {
            (Some(account), Some(principal)) => {
                (lease.account_id.as_str(), lease.principal_id.as_str())
                    >= (account.as_str(), principal.as_str())
            }
            (Some(account), None) => lease.account_id.as_str() >= account.as_str(),
            _ => true,
        }
    }
}

/// One page of leases plus the cursor of the first unreturned record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeasePage {
    pub leases: Vec<Lease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_principal_id: Option<String>,
}

impl LeasePage {
    /// Cuts `sorted` down to `limit` records and fills in the next cursor.
    pub fn from_sorted(mut sorted: Vec<Lease>, limit: i64) -> Self {
        let limit = limit.max(1) as usize;
        if sorted.len() <= limit {
            return Self {
                leases: sorted,
                ..Default::default()
            };
        }
        let rest = sorted.split_off(limit);
        let next = &rest[0];
        Self {
            next_account_id: Some(next.account_id.clone()),
            next_principal_id: Some(next.principal_id.clone()),
            leases: sorted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(account: &str, principal: &str, status: LeaseStatus) -> Lease {
        Lease {
            id: format!("{}-{}", account, principal),
            account_id: account.to_string(),
            principal_id: principal.to_string(),
            status,
            status_reason: LeaseStatusReason::Active,
            created_on: 0,
            last_modified_on: 0,
            status_modified_on: 0,
            budget_amount: 100.0,
            budget_currency: "USD".to_string(),
            budget_notification_emails: vec![],
            expires_on: 0,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_status_serializes_as_variant_name() {
        assert_eq!(
            serde_json::to_string(&LeaseStatusReason::RolledBack).unwrap(),
            "\"RolledBack\""
        );
        assert_eq!(
            serde_json::to_string(&LeaseStatus::ResetFinanceLock).unwrap(),
            "\"ResetFinanceLock\""
        );
        assert_eq!("ResetLock".parse::<LeaseStatus>().unwrap(), LeaseStatus::ResetLock);
        assert!("Paused".parse::<LeaseStatus>().is_err());
    }

    #[test]
    fn test_reset_lock_targets() {
        assert_eq!(LeaseStatus::Active.reset_lock_target(), Some(LeaseStatus::ResetLock));
        assert_eq!(
            LeaseStatus::FinanceLock.reset_lock_target(),
            Some(LeaseStatus::ResetFinanceLock)
        );
        assert_eq!(LeaseStatus::Inactive.reset_lock_target(), None);
        assert_eq!(LeaseStatus::ResetLock.reset_unlock_target(), Some(LeaseStatus::Active));
        assert!(LeaseStatus::ResetLock.is_live());
        assert!(!LeaseStatus::Inactive.is_live());
    }

    #[test]
    fn test_create_rejects_server_assigned_fields() {
        let request = CreateLease {
            id: Some("abc".to_string()),
            principal_id: Some("user".to_string()),
            ..Default::default()
        };
        let err = request.validate_create_request().unwrap_err();
        assert_eq!(err.client_message(), "lease validation error: id must be empty");

        let request = CreateLease {
            status: Some(LeaseStatus::Active),
            ..Default::default()
        };
        assert!(request.validate_create_request().is_err());
    }

    #[test]
    fn test_create_rejects_bad_account_id() {
        let request = CreateLease {
            account_id: Some("12345".to_string()),
            ..Default::default()
        };
        assert!(request.validate_create_request().is_err());

        let request = CreateLease {
            account_id: Some("123456789012".to_string()),
            ..Default::default()
        };
        assert!(request.validate_create_request().is_ok());
    }

    #[test]
    fn test_page_sets_cursor_of_first_unreturned() {
        let leases = vec![
            lease("111111111111", "a", LeaseStatus::Active),
            lease("222222222222", "b", LeaseStatus::Active),
            lease("333333333333", "c", LeaseStatus::Inactive),
        ];
        let page = LeasePage::from_sorted(leases, 2);
        assert_eq!(page.leases.len(), 2);
        assert_eq!(page.next_account_id.as_deref(), Some("333333333333"));
        assert_eq!(page.next_principal_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_query_matches_and_cursor() {
        let query = LeaseQuery {
            status: Some(LeaseStatus::Active),
            next_account_id: Some("222222222222".to_string()),
            next_principal_id: Some("b".to_string()),
            ..Default::default()
        };
        let before = lease("111111111111", "a", LeaseStatus::Active);
        let at = lease("222222222222", "b", LeaseStatus::Active);
        let inactive = lease("333333333333", "c", LeaseStatus::Inactive);
        assert!(!query.after_cursor(&before));
        assert!(query.after_cursor(&at) && query.matches(&at));
        assert!(!query.matches(&inactive));
    }
}
