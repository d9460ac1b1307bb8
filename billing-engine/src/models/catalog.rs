//! Customer, meter, and price-amount models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Declarative description of a billable signal. `code` is the string
/// customers send on ingestion; unique per `(org_id, code)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meter {
    pub id: i64,
    pub org_id: i64,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One priced unit rate for a price, optionally scoped to a meter.
/// Effective intervals for the same `(price_id, meter_id)` never overlap.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceAmount {
    pub id: i64,
    pub org_id: i64,
    pub price_id: i64,
    pub meter_id: Option<i64>,
    pub currency: String,
    pub unit_amount_cents: i64,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
