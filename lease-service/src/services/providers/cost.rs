use super::{aws_error, CostProvider};
use async_trait::async_trait;
use aws_sdk_costexplorer::error::DisplayErrorContext;
use aws_sdk_costexplorer::types::{DateInterval, Granularity};
use aws_sdk_costexplorer::Client as CostExplorerClient;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Mutex;

const UNBLENDED_COST: &str = "UnblendedCost";

/// Cost Explorer backed spend lookup for one account session.
pub struct CostExplorerProvider {
    client: CostExplorerClient,
}

impl CostExplorerProvider {
    pub fn new(client: CostExplorerClient) -> Self {
        Self { client }
    }
}

fn ce_date(epoch: i64) -> Result<String, AppError> {
    DateTime::<Utc>::from_timestamp(epoch, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| AppError::Validation(format!("invalid cost query time {}", epoch)))
}

#[async_trait]
impl CostProvider for CostExplorerProvider {
    async fn calculate_total_spend(&self, start: i64, end: i64) -> Result<f64, AppError> {
        let period = DateInterval::builder()
            .start(ce_date(start)?)
            .end(ce_date(end)?)
            .build()
            .map_err(|e| aws_error("Cost Explorer date interval", e))?;

        let output = self
            .client
            .get_cost_and_usage()
            .time_period(period)
            .granularity(Granularity::Daily)
            .metrics(UNBLENDED_COST)
            .send()
            .await
            .map_err(|e| aws_error("Cost Explorer GetCostAndUsage", DisplayErrorContext(e)))?;

        let mut total = 0.0;
        for result in output.results_by_time() {
            let amount = result
                .total()
                .and_then(|t| t.get(UNBLENDED_COST))
                .and_then(|m| m.amount());
            if let Some(amount) = amount {
                total += amount.parse::<f64>().map_err(|e| {
                    aws_error("Cost Explorer amount parse", format!("{:?}: {}", amount, e))
                })?;
            }
        }
        Ok(total)
    }
}

/// Fixed spend, optionally failing.
#[derive(Debug, Default)]
pub struct StaticCost {
    amount: Mutex<f64>,
    fail: Mutex<bool>,
}

impl StaticCost {
    pub fn new(amount: f64) -> Self {
        Self {
            amount: Mutex::new(amount),
            fail: Mutex::new(false),
        }
    }

    pub fn set(&self, amount: f64) {
        if let Ok(mut a) = self.amount.lock() {
            *a = amount;
        }
    }

    pub fn fail(&self, fail: bool) {
        if let Ok(mut f) = self.fail.lock() {
            *f = fail;
        }
    }
}

#[async_trait]
impl CostProvider for StaticCost {
    async fn calculate_total_spend(&self, _start: i64, _end: i64) -> Result<f64, AppError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Cost Explorer GetCostAndUsage failed: access denied"
            )));
        }
        Ok(self.amount.lock().map(|a| *a).unwrap_or_default())
    }
}
