//! Engine services, leaves first: clock and ids, outbox, ledger, usage
//! ingestion, snapshot worker, rating, cycle scheduler, payment pipeline.

pub mod audit;
pub mod cache;
pub mod clock;
pub mod database;
pub mod idgen;
pub mod ledger;
pub mod metrics;
pub mod outbox;
pub mod payment;
pub mod rating;
pub mod scheduler;
pub mod snapshot;
pub mod usage;

pub use audit::AuditService;
pub use cache::{ResolverCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use idgen::IdGenerator;
pub use ledger::LedgerService;
pub use metrics::{get_metrics, init_metrics};
pub use outbox::Outbox;
pub use payment::PaymentService;
pub use rating::RatingService;
pub use scheduler::{
    InvoiceDriver, InvoiceOutcome, NullInvoiceDriver, Scheduler, SchedulerConfig,
};
pub use snapshot::{SnapshotConfig, SnapshotWorker};
pub use usage::UsageService;
