//! Rated line item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One deterministic rating of a meter's usage within a cycle. Insertion is
/// idempotent on `checksum`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RatingResult {
    pub id: i64,
    pub org_id: i64,
    pub subscription_id: i64,
    pub billing_cycle_id: i64,
    pub meter_id: i64,
    pub price_id: i64,
    pub quantity: f64,
    pub unit_price: i64,
    pub amount: i64,
    pub currency: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub source: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}
