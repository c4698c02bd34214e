//! Domain models for lease-service.

mod account;
mod lease;
mod reset;
mod usage;

pub use account::{parse_role_name, Account, AccountStatus};
pub use lease::{
    validate_account_id, CreateLease, Lease, LeasePage, LeaseQuery, LeaseStatus,
    LeaseStatusReason,
};
pub use reset::{ResetOutput, ResetResult};
pub use usage::{end_of_day, start_of_day, BudgetPeriod, Usage, SECONDS_PER_DAY};
