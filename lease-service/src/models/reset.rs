//! Reset queue drain results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome for one account in a drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResult {
    pub build_trigger: bool,
    pub message_deletion: bool,
}

impl ResetResult {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.build_trigger && self.message_deletion
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetOutput {
    pub success: bool,
    pub accounts: HashMap<String, ResetResult>,
}

impl ResetOutput {
    pub fn started() -> Self {
        Self {
            success: true,
            accounts: HashMap::new(),
        }
    }

    pub fn record(&mut self, account_id: &str, result: ResetResult) {
        if !result.is_complete() {
            self.success = false;
        }
        self.accounts.insert(account_id.to_string(), result);
    }
}
