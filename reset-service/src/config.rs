use crate::nuke::{NukeSubstitutions, TemplateSource};
use crate::storage::ObjectStorage;
use lease_service::config::MongoConfig;
use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NUKE_TEMPLATE: &str = "default-nuke-config-template.yml";

/// Settings for one reset job, read from the build environment.
#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub log_level: String,
    pub region: String,
    pub account_id: String,
    pub admin_role_name: String,
    pub principal_role_name: String,
    pub principal_policy_name: String,
    pub nuke_dry_run: bool,
    pub nuke_template_default: PathBuf,
    pub nuke_template_bucket: Option<String>,
    pub nuke_template_key: Option<String>,
    pub nuke_timeout_minutes: u64,
    pub nuke_binary: String,
    pub scratch_dir: PathBuf,
    pub mongodb: MongoConfig,
}

/// Anything but a case-insensitive "false" keeps the dry run on.
pub fn parse_dry_run(raw: &str) -> bool {
    !raw.trim().eq_ignore_ascii_case("false")
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ResetConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        Ok(ResetConfig {
            log_level: common.log_level,
            region: get_env("AWS_CURRENT_REGION", Some("us-east-1"), is_prod)?,
            account_id: get_env("RESET_ACCOUNT", None, is_prod)?,
            admin_role_name: get_env("RESET_ACCOUNT_ADMIN_ROLE_NAME", None, is_prod)?,
            principal_role_name: get_env("RESET_ACCOUNT_PRINCIPAL_ROLE_NAME", None, is_prod)?,
            principal_policy_name: get_env("RESET_ACCOUNT_PRINCIPAL_POLICY_NAME", None, is_prod)?,
            nuke_dry_run: parse_dry_run(&get_env("RESET_NUKE_DRY_RUN", Some("true"), is_prod)?),
            nuke_template_default: PathBuf::from(get_env(
                "RESET_NUKE_TEMPLATE_DEFAULT",
                Some(DEFAULT_NUKE_TEMPLATE),
                is_prod,
            )?),
            nuke_template_bucket: optional_env("RESET_NUKE_TEMPLATE_BUCKET"),
            nuke_template_key: optional_env("RESET_NUKE_TEMPLATE_KEY"),
            nuke_timeout_minutes: get_env_parsed("RESET_NUKE_TIMEOUT_MINUTES", 60)?,
            nuke_binary: get_env("RESET_NUKE_BINARY", Some("aws-nuke"), is_prod)?,
            scratch_dir: PathBuf::from(get_env("RESET_SCRATCH_DIR", Some("/tmp"), is_prod)?),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("lease_db"), is_prod)?,
            },
        })
    }

    pub fn admin_role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.admin_role_name)
    }

    pub fn nuke_deadline(&self) -> Duration {
        Duration::from_secs(self.nuke_timeout_minutes * 60)
    }

    pub fn substitutions(&self) -> NukeSubstitutions {
        NukeSubstitutions {
            account_id: self.account_id.clone(),
            admin_role: self.admin_role_name.clone(),
            principal_role: self.principal_role_name.clone(),
            principal_policy: self.principal_policy_name.clone(),
        }
    }

    /// The object-storage override when both bucket and key are set,
    /// the local default otherwise.
    pub fn template_source(&self, storage: Arc<dyn ObjectStorage>) -> TemplateSource {
        match (&self.nuke_template_bucket, &self.nuke_template_key) {
            (Some(bucket), Some(key)) => TemplateSource::Object {
                storage,
                bucket: bucket.clone(),
                key: key.clone(),
            },
            _ => TemplateSource::Local(self.nuke_template_default.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStorage;

    fn config() -> ResetConfig {
        ResetConfig {
            log_level: "info".to_string(),
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            admin_role_name: "AdminRole".to_string(),
            principal_role_name: "PrincipalRole".to_string(),
            principal_policy_name: "PrincipalPolicy".to_string(),
            nuke_dry_run: true,
            nuke_template_default: PathBuf::from(DEFAULT_NUKE_TEMPLATE),
            nuke_template_bucket: None,
            nuke_template_key: None,
            nuke_timeout_minutes: 60,
            nuke_binary: "aws-nuke".to_string(),
            scratch_dir: PathBuf::from("/tmp"),
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "lease_db".to_string(),
            },
        }
    }

    #[test]
    fn test_dry_run_parsing() {
        assert!(parse_dry_run("true"));
        assert!(parse_dry_run("TRUE"));
        assert!(parse_dry_run("yes"));
        assert!(!parse_dry_run("false"));
        assert!(!parse_dry_run(" False "));
    }

    #[test]
    fn test_derived_values() {
        let config = config();
        assert_eq!(config.admin_role_arn(), "arn:aws:iam::123456789012:role/AdminRole");
        assert_eq!(config.nuke_deadline(), Duration::from_secs(3600));
        assert_eq!(config.substitutions().principal_policy, "PrincipalPolicy");
    }

    #[test]
    fn test_template_source_needs_bucket_and_key() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryObjectStorage::new());
        let mut config = config();
        config.nuke_template_bucket = Some("templates".to_string());
        assert!(matches!(
            config.template_source(storage.clone()),
            TemplateSource::Local(_)
        ));

        config.nuke_template_key = Some("nuke.yml".to_string());
        match config.template_source(storage) {
            TemplateSource::Object { bucket, key, .. } => {
                assert_eq!(bucket, "templates");
                assert_eq!(key, "nuke.yml");
            }
            TemplateSource::Local(_) => panic!("expected object template"),
        }
    }
}
