pub mod budget;
pub mod clock;
pub mod leases;
pub mod metrics;
pub mod notification;
pub mod providers;
pub mod reset_queue;
pub mod store;

pub use budget::{determine_threshold_percentile, is_lease_expired, BudgetEvaluator, BudgetSweep};
pub use clock::{Clock, FixedClock, SystemClock};
pub use leases::LeaseService;
pub use metrics::{get_metrics, init_metrics};
pub use notification::{compose_budget_notification, BudgetNotifier, RenderedNotification};
pub use reset_queue::ResetQueueDrainer;
pub use store::{MemoryStore, MongoStore, RecordStore};
