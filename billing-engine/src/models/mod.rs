//! Persistence models for the billing lifecycle engine.

pub mod audit;
pub mod catalog;
pub mod cycle;
pub mod events;
pub mod invoice;
pub mod ledger;
pub mod payment;
pub mod rating;
pub mod subscription;
pub mod usage;

pub use audit::{ActorType, AuditLog};
pub use catalog::{Customer, Meter, PriceAmount};
pub use cycle::{BillingCycle, BillingCycleStatus};
pub use events::{Event, event_types};
pub use invoice::{Invoice, InvoiceStatus};
pub use ledger::{
    Direction, EntryLine, LedgerAccount, LedgerEntry, LedgerEntryLine, account_codes, source_types,
    validate_balanced,
};
pub use payment::{
    DisputeEvent, DisputeRecord, DisputeStatus, PaymentEvent, PaymentEventRecord,
    dispute_event_types, payment_event_types,
};
pub use rating::RatingResult;
pub use subscription::{BillingCycleType, Subscription, SubscriptionItem, SubscriptionStatus};
pub use usage::{IngestRequest, SnapshotCandidate, SnapshotUpdate, UsageEvent, UsageStatus};
