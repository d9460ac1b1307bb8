//! Billing cycle model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Billing cycle status. Transitions are strictly
/// OPEN -> CLOSING -> CLOSED, serialized by row locks plus a
/// predecessor-status guard on every UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycleStatus {
    Open,
    Closing,
    Closed,
}

impl BillingCycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycleStatus::Open => "OPEN",
            BillingCycleStatus::Closing => "CLOSING",
            BillingCycleStatus::Closed => "CLOSED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CLOSING" => BillingCycleStatus::Closing,
            "CLOSED" => BillingCycleStatus::Closed,
            _ => BillingCycleStatus::Open,
        }
    }
}

/// One `[period_start, period_end)` interval for a subscription. The
/// `*_at` columns are write-once latches set via `COALESCE(latch, now)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingCycle {
    pub id: i64,
    pub org_id: i64,
    pub subscription_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub closing_started_at: Option<DateTime<Utc>>,
    pub rating_completed_at: Option<DateTime<Utc>>,
    pub invoiced_at: Option<DateTime<Utc>>,
    pub invoice_finalized_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingCycle {
    pub fn parsed_status(&self) -> BillingCycleStatus {
        BillingCycleStatus::from_string(&self.status)
    }
}
