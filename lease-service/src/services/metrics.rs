//! Metrics collection and Prometheus export.
//!
//! Initializes the metrics exporter, provides the /metrics endpoint body and
//! the domain counters recorded by the lease services.

use crate::models::{LeaseStatus, LeaseStatusReason};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_lease_transition(from: LeaseStatus, to: LeaseStatus, reason: LeaseStatusReason) {
    metrics::counter!(
        "lease_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_drain_account(outcome: &'static str) {
    metrics::counter!("reset_drain_accounts_total", "outcome" => outcome).increment(1);
}

pub fn record_budget_notification(is_over_budget: bool) {
    let kind = if is_over_budget { "over_budget" } else { "threshold" };
    metrics::counter!("budget_notifications_sent_total", "kind" => kind).increment(1);
}
