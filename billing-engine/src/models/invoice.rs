//! Invoice model. Invoice generation lives outside the engine; the engine
//! reads invoice status for subscription end-of-life checks and maintains
//! settlement metadata (`amount_paid`, `paid_at`) from payment events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Finalized,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Finalized => "FINALIZED",
            InvoiceStatus::Void => "VOID",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "FINALIZED" => InvoiceStatus::Finalized,
            "VOID" => InvoiceStatus::Void,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Terminal states allow the owning subscription to end.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Finalized | InvoiceStatus::Void)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub org_id: i64,
    pub billing_cycle_id: i64,
    pub customer_id: i64,
    pub status: String,
    pub currency: String,
    pub subtotal_amount: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
