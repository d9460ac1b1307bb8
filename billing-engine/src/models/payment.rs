//! Canonical payment/dispute events and their persistence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Canonical event types produced by provider adapters.
pub mod payment_event_types {
    pub const PAYMENT_SUCCEEDED: &str = "payment_succeeded";
    pub const PAYMENT_FAILED: &str = "payment_failed";
    pub const REFUNDED: &str = "refunded";
}

/// Provider-neutral payment event parsed from a verified webhook.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub org_id: i64,
    pub customer_id: i64,
    pub amount: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub invoice_id: Option<i64>,
}

/// Normalized provider event row, unique on `(provider, provider_event_id)`.
/// `processed_at` is the settlement latch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentEventRecord {
    pub id: i64,
    pub org_id: i64,
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub customer_id: i64,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Dispute lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Withdrawn,
    Reinstated,
    Closed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::Withdrawn => "withdrawn",
            DisputeStatus::Reinstated => "reinstated",
            DisputeStatus::Closed => "closed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "withdrawn" => DisputeStatus::Withdrawn,
            "reinstated" => DisputeStatus::Reinstated,
            "closed" => DisputeStatus::Closed,
            _ => DisputeStatus::Open,
        }
    }
}

/// Canonical dispute event types.
pub mod dispute_event_types {
    pub const FUNDS_WITHDRAWN: &str = "dispute.funds_withdrawn";
    pub const FUNDS_REINSTATED: &str = "dispute.funds_reinstated";
}

/// Provider-neutral dispute event parsed from a verified webhook.
#[derive(Debug, Clone)]
pub struct DisputeEvent {
    pub provider: String,
    pub provider_event_id: String,
    pub provider_dispute_id: String,
    pub event_type: String,
    pub org_id: i64,
    pub customer_id: i64,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Normalized dispute lifecycle row, unique on
/// `(provider, provider_dispute_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DisputeRecord {
    pub id: i64,
    pub org_id: i64,
    pub provider: String,
    pub provider_dispute_id: String,
    pub provider_event_id: String,
    pub customer_id: i64,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub reason: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
