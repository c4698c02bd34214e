//! Account model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

static ROLE_ARN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws:iam::\d{12}:role/(.+)$").expect("role arn pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    Ready,
    NotReady,
    Leased,
    Orphaned,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Ready => "Ready",
            AccountStatus::NotReady => "NotReady",
            AccountStatus::Leased => "Leased",
            AccountStatus::Orphaned => "Orphaned",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ready" => Ok(AccountStatus::Ready),
            "NotReady" => Ok(AccountStatus::NotReady),
            "Leased" => Ok(AccountStatus::Leased),
            "Orphaned" => Ok(AccountStatus::Orphaned),
            other => Err(AppError::Validation(format!(
                "account validation error: unknown status {:?}",
                other
            ))),
        }
    }
}

/// A cloud account in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub status: AccountStatus,
    pub admin_role_arn: String,
    pub principal_role_arn: String,
    #[serde(default)]
    pub principal_policy_hash: String,
    pub created_on: i64,
    pub last_modified_on: i64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Account {
    pub fn admin_role_name(&self) -> Result<String, AppError> {
        parse_role_name(&self.admin_role_arn)
    }

    pub fn principal_role_name(&self) -> Result<String, AppError> {
        parse_role_name(&self.principal_role_arn)
    }
}

/// Extracts the role name (including any path) from an IAM role ARN.
pub fn parse_role_name(arn: &str) -> Result<String, AppError> {
    ROLE_ARN_RE
        .captures(arn)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::Validation(format!("invalid role arn {:?}", arn)))
}
