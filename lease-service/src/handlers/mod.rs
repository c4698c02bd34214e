pub mod accounts;
pub mod health;
pub mod leases;
pub mod reset_queue;

pub use accounts::orphan_account;
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use leases::{
    check_active_leases, check_budget, create_lease, delete_lease, get_lease, list_leases,
};
pub use reset_queue::{drain_reset_queue, populate_reset_queue};
