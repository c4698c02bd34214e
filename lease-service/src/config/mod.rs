use crate::models::BudgetPeriod;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_parsed, parse_float_list, split_list};
use service_core::error::AppError;

pub const DEFAULT_TEMPLATE_SUBJECT: &str =
    "Lease {% if IsOverBudget %}over budget{% else %}at {{ ThresholdPercentile }}% of budget{% endif %} for account {{ Lease.account_id }}";

pub const DEFAULT_TEMPLATE_TEXT: &str = r#"
Lease for principal {{ Lease.principal_id }} on account {{ Lease.account_id }}
has spent {{ ActualSpend }} of its {{ Lease.budget_amount }} {{ Lease.budget_currency }} budget.
{% if IsOverBudget %}The lease is over budget and has been locked.{% else %}The lease has reached {{ ThresholdPercentile }}% of its budget.{% endif %}
"#;

pub const DEFAULT_TEMPLATE_HTML: &str = r#"
<p>Lease for principal <b>{{ Lease.principal_id }}</b> on account <b>{{ Lease.account_id }}</b>
has spent {{ ActualSpend }} of its {{ Lease.budget_amount }} {{ Lease.budget_currency }} budget.</p>
{% if IsOverBudget %}<p>The lease is over budget and has been locked.</p>{% else %}<p>The lease has reached {{ ThresholdPercentile }}% of its budget.</p>{% endif %}
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub aws: AwsConfig,
    pub policy: LeasePolicy,
    pub notification: NotificationSettings,
    pub smtp: SmtpConfig,
    pub otlp_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub reset_queue_url: String,
    pub reset_build_name: String,
    pub lease_locked_topic_arn: String,
    pub lease_events_topic_arn: String,
}

/// Limits applied when creating and evaluating leases.
#[derive(Debug, Clone, Deserialize)]
pub struct LeasePolicy {
    pub max_lease_budget_amount: f64,
    /// Longest allowed lease, in seconds.
    pub max_lease_period: i64,
    pub principal_budget_amount: f64,
    pub principal_budget_period: BudgetPeriod,
    pub default_lease_length_in_days: i64,
    /// Days before cached usage expires; one calendar month when unset.
    pub usage_ttl_days: Option<i64>,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            max_lease_budget_amount: 1000.0,
            max_lease_period: 704_800,
            principal_budget_amount: 1000.0,
            principal_budget_period: BudgetPeriod::Weekly,
            default_lease_length_in_days: 7,
            usage_ttl_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTemplates {
    pub html: String,
    pub text: String,
    pub subject: String,
}

impl Default for NotificationTemplates {
    fn default() -> Self {
        Self {
            html: DEFAULT_TEMPLATE_HTML.to_string(),
            text: DEFAULT_TEMPLATE_TEXT.to_string(),
            subject: DEFAULT_TEMPLATE_SUBJECT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub from_email: String,
    pub bcc_emails: Vec<String>,
    pub templates: NotificationTemplates,
    pub threshold_percentiles: Vec<f64>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            from_email: "noreply@example.com".to_string(),
            bcc_emails: Vec::new(),
            templates: NotificationTemplates::default(),
            threshold_percentiles: vec![75.0, 100.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub enabled: bool,
}

impl LeaseConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let usage_ttl_days = match std::env::var("USAGE_TTL") {
            Ok(raw) => Some(raw.trim().parse::<i64>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("USAGE_TTL has an invalid value {:?}: {}", raw, e))
            })?),
            Err(_) => None,
        };

        Ok(LeaseConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("lease_db"), is_prod)?,
            },
            aws: AwsConfig {
                region: get_env("AWS_CURRENT_REGION", Some("us-east-1"), is_prod)?,
                reset_queue_url: get_env("RESET_QUEUE_URL", None, is_prod)?,
                reset_build_name: get_env("RESET_BUILD_NAME", Some("ResetCodeBuild"), is_prod)?,
                lease_locked_topic_arn: get_env("LEASE_LOCKED_TOPIC_ARN", None, is_prod)?,
                lease_events_topic_arn: get_env("LEASE_EVENTS_TOPIC_ARN", None, is_prod)?,
            },
            policy: LeasePolicy {
                max_lease_budget_amount: get_env_parsed("MAX_LEASE_BUDGET_AMOUNT", 1000.0)?,
                max_lease_period: get_env_parsed("MAX_LEASE_PERIOD", 704_800)?,
                principal_budget_amount: get_env_parsed("PRINCIPAL_BUDGET_AMOUNT", 1000.0)?,
                principal_budget_period: get_env_parsed(
                    "PRINCIPAL_BUDGET_PERIOD",
                    BudgetPeriod::Weekly,
                )?,
                default_lease_length_in_days: get_env_parsed("DEFAULT_LEASE_LENGTH_IN_DAYS", 7)?,
                usage_ttl_days,
            },
            notification: NotificationSettings {
                from_email: get_env(
                    "BUDGET_NOTIFICATION_FROM_EMAIL",
                    Some("noreply@example.com"),
                    is_prod,
                )?,
                bcc_emails: split_list(&get_env(
                    "BUDGET_NOTIFICATION_BCC_EMAILS",
                    Some(""),
                    is_prod,
                )?),
                templates: NotificationTemplates {
                    html: get_env(
                        "BUDGET_NOTIFICATION_TEMPLATE_HTML",
                        Some(DEFAULT_TEMPLATE_HTML),
                        is_prod,
                    )?,
                    text: get_env(
                        "BUDGET_NOTIFICATION_TEMPLATE_TEXT",
                        Some(DEFAULT_TEMPLATE_TEXT),
                        is_prod,
                    )?,
                    subject: get_env(
                        "BUDGET_NOTIFICATION_TEMPLATE_SUBJECT",
                        Some(DEFAULT_TEMPLATE_SUBJECT),
                        is_prod,
                    )?,
                },
                threshold_percentiles: parse_float_list(
                    "BUDGET_NOTIFICATION_THRESHOLD_PERCENTILES",
                    &get_env("BUDGET_NOTIFICATION_THRESHOLD_PERCENTILES", Some("75,100"), is_prod)?,
                )?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: get_env_parsed("SMTP_PORT", 587)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                enabled: get_env_parsed("SMTP_ENABLED", false)?,
            },
            otlp_endpoint: get_env("OTLP_ENDPOINT", Some("http://localhost:4317"), is_prod)?,
        })
    }
}
