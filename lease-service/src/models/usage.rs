//! Cached spend observations and billing periods.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fmt;
use std::str::FromStr;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// One day of spend for a principal on an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub principal_id: String,
    pub account_id: String,
    pub start_date: i64,
    pub end_date: i64,
    pub cost_amount: f64,
    pub cost_currency: String,
    pub time_to_live: i64,
}

impl Usage {
    /// Usage row for the UTC day starting at `day_start`.
    ///
    /// Rows expire `ttl_days` after the day starts, or one calendar month
    /// later when unset.
    pub fn for_day(
        principal_id: &str,
        account_id: &str,
        day_start: DateTime<Utc>,
        cost_amount: f64,
        ttl_days: Option<i64>,
    ) -> Self {
        let ttl = match ttl_days {
            Some(days) => day_start + Duration::days(days),
            None => day_start
                .checked_add_months(Months::new(1))
                .unwrap_or(day_start + Duration::days(30)),
        };
        Self {
            principal_id: principal_id.to_string(),
            account_id: account_id.to_string(),
            start_date: day_start.timestamp(),
            end_date: day_start.timestamp() + SECONDS_PER_DAY - 1,
            cost_amount,
            cost_currency: "USD".to_string(),
            time_to_live: ttl.timestamp(),
        }
    }
}

/// Midnight UTC of the day containing `at`.
pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
        .single()
        .unwrap_or(at)
}

/// Last second of the day containing `at`.
pub fn end_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(at) + Duration::seconds(SECONDS_PER_DAY - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    /// Start of the billing period containing `now`.
    ///
    /// Weeks start on Sunday.
    pub fn beginning_of_current(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = start_of_day(now);
        match self {
            BudgetPeriod::Weekly => {
                let back = today.weekday().num_days_from_sunday() as i64;
                today - Duration::days(back)
            }
            BudgetPeriod::Monthly => Utc
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(today),
        }
    }
}

impl FromStr for BudgetPeriod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WEEKLY" => Ok(BudgetPeriod::Weekly),
            "MONTHLY" => Ok(BudgetPeriod::Monthly),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "unknown budget period {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetPeriod::Weekly => f.write_str("WEEKLY"),
            BudgetPeriod::Monthly => f.write_str("MONTHLY"),
        }
    }
}
