//! Budget notification rendering and delivery.

use crate::config::{NotificationSettings, NotificationTemplates};
use crate::models::Lease;
use crate::services::metrics::record_budget_notification;
use crate::services::providers::EmailSender;
use service_core::error::AppError;
use std::sync::Arc;
use tera::{Context, Tera};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotification {
    pub subject: String,
    pub html: String,
    pub text: String,
    pub is_over_budget: bool,
}

fn render(name: &str, template: &str, context: &Context, autoescape: bool) -> Result<String, AppError> {
    Tera::one_off(template, context, autoescape)
        .map(|out| out.trim().to_string())
        .map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "Failed to render budget notification {} template: {}",
                name,
                e
            ))
        })
}

/// Renders the subject, HTML and text bodies for a budget notification.
///
/// Templates see `Lease`, `ActualSpend`, `IsOverBudget` and an integer
/// `ThresholdPercentile`. Only the HTML body is escaped.
pub fn compose_budget_notification(
    lease: &Lease,
    actual_spend: f64,
    threshold_percentile: f64,
    templates: &NotificationTemplates,
) -> Result<RenderedNotification, AppError> {
    let is_over_budget = actual_spend >= lease.budget_amount;

    let mut context = Context::new();
    context.insert("Lease", lease);
    context.insert("ActualSpend", &actual_spend);
    context.insert("IsOverBudget", &is_over_budget);
    context.insert("ThresholdPercentile", &(threshold_percentile as i64));

    Ok(RenderedNotification {
        subject: render("subject", &templates.subject, &context, false)?,
        html: render("html", &templates.html, &context, true)?,
        text: render("text", &templates.text, &context, false)?,
        is_over_budget,
    })
}

/// Sends budget notifications to a lease's recipients.
pub struct BudgetNotifier {
    email: Arc<dyn EmailSender>,
    settings: NotificationSettings,
}

impl BudgetNotifier {
    pub fn new(email: Arc<dyn EmailSender>, settings: NotificationSettings) -> Self {
        Self { email, settings }
    }

    pub fn threshold_percentiles(&self) -> &[f64] {
        &self.settings.threshold_percentiles
    }

    /// Returns `Ok(true)` when an email went out, `Ok(false)` when there was
    /// nothing to send.
    pub async fn notify(
        &self,
        lease: &Lease,
        actual_spend: f64,
        threshold_percentile: f64,
    ) -> Result<bool, AppError> {
        if threshold_percentile <= 0.0 {
            return Ok(false);
        }
        let to = &lease.budget_notification_emails;
        let bcc = &self.settings.bcc_emails;
        if to.is_empty() && bcc.is_empty() {
            tracing::debug!(lease = %lease.log_id(), "No budget notification recipients");
            return Ok(false);
        }

        let rendered = compose_budget_notification(
            lease,
            actual_spend,
            threshold_percentile,
            &self.settings.templates,
        )?;

        tracing::info!(
            lease = %lease.log_id(),
            threshold = threshold_percentile,
            actual_spend,
            "Sending budget notification"
        );
        self.email
            .send_email(
                &self.settings.from_email,
                to,
                bcc,
                &rendered.subject,
                &rendered.html,
                &rendered.text,
            )
            .await?;
        record_budget_notification(rendered.is_over_budget);
        Ok(true)
    }
}
