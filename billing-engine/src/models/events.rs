//! Outbox event types and payloads for downstream rollups.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Billing event types published through the outbox.
pub mod event_types {
    pub const USAGE_INGESTED: &str = "usage.ingested";
    pub const LEDGER_ENTRY_CREATED: &str = "ledger_entry_created";
    pub const INVOICE_FINALIZED: &str = "invoice_finalized";
    pub const INVOICE_VOIDED: &str = "invoice_voided";
    pub const PAYMENT_SETTLED: &str = "payment_settled";
    pub const REFUND_SETTLED: &str = "refund_settled";
    pub const DISPUTE_WITHDRAWN: &str = "dispute_withdrawn";
    pub const DISPUTE_REINSTATED: &str = "dispute_reinstated";
}

/// A billing event to store in the outbox. `dedupe_key` collapses duplicate
/// publications to at most one row per `(org_id, dedupe_key)`.
#[derive(Debug, Clone)]
pub struct Event {
    pub org_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
}

/// Minimal data needed to kick off async usage processing downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageIngestedPayload {
    pub usage_event_id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub meter_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_item_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl UsageIngestedPayload {
    pub fn into_event(self) -> Event {
        Event {
            org_id: self.org_id,
            event_type: event_types::USAGE_INGESTED.to_string(),
            dedupe_key: self.usage_event_id.to_string(),
            payload: serde_json::to_value(&self).unwrap_or_else(|_| json!({})),
        }
    }
}

/// Minimal data needed to roll up a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryPayload {
    pub ledger_entry_id: i64,
    pub org_id: i64,
    pub source_type: String,
    pub source_id: i64,
}

impl LedgerEntryPayload {
    pub fn into_event(self) -> Event {
        Event {
            org_id: self.org_id,
            event_type: event_types::LEDGER_ENTRY_CREATED.to_string(),
            dedupe_key: format!("ledger_entry:{}", self.ledger_entry_id),
            payload: serde_json::to_value(&self).unwrap_or_else(|_| json!({})),
        }
    }
}

/// Minimal data needed to roll up invoice lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub invoice_id: i64,
    pub org_id: i64,
    pub billing_cycle_id: i64,
}

impl InvoicePayload {
    pub fn into_event(self, event_type: &str) -> Event {
        Event {
            org_id: self.org_id,
            event_type: event_type.to_string(),
            dedupe_key: format!("{}:{}", event_type, self.invoice_id),
            payload: serde_json::to_value(&self).unwrap_or_else(|_| json!({})),
        }
    }
}

/// Minimal data needed to roll up payment settlement events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementPayload {
    pub payment_event_id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<i64>,
}

impl SettlementPayload {
    pub fn into_event(self, event_type: &str) -> Event {
        Event {
            org_id: self.org_id,
            event_type: event_type.to_string(),
            dedupe_key: format!("{}:{}", event_type, self.payment_event_id),
            payload: serde_json::to_value(&self).unwrap_or_else(|_| json!({})),
        }
    }
}

/// Minimal data needed to roll up dispute lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputePayload {
    pub dispute_id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub amount: i64,
    pub currency: String,
    pub provider_event_id: String,
}

impl DisputePayload {
    pub fn into_event(self, event_type: &str) -> Event {
        Event {
            org_id: self.org_id,
            event_type: event_type.to_string(),
            dedupe_key: format!("{}:{}:{}", event_type, self.dispute_id, self.provider_event_id),
            payload: serde_json::to_value(&self).unwrap_or_else(|_| json!({})),
        }
    }
}
