//! Raw usage event model and snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Usage event lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Accepted,
    Enriched,
    Rated,
    UnmatchedMeter,
    UnmatchedSubscription,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Accepted => "accepted",
            UsageStatus::Enriched => "enriched",
            UsageStatus::Rated => "rated",
            UsageStatus::UnmatchedMeter => "unmatched_meter",
            UsageStatus::UnmatchedSubscription => "unmatched_subscription",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "enriched" => UsageStatus::Enriched,
            "rated" => UsageStatus::Rated,
            "unmatched_meter" => UsageStatus::UnmatchedMeter,
            "unmatched_subscription" => UsageStatus::UnmatchedSubscription,
            _ => UsageStatus::Accepted,
        }
    }
}

/// A single unit of metered activity. Written once at ingest, mutated only
/// by the snapshot worker and the rating pass, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub subscription_id: Option<i64>,
    pub subscription_item_id: Option<i64>,
    pub meter_id: Option<i64>,
    pub meter_code: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub status: String,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub snapshot_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ingestion request as received from the HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub customer_id: String,
    pub meter_code: String,
    pub value: f64,
    pub recorded_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A usage event claimed by the snapshot worker for enrichment.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotCandidate {
    pub id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub meter_code: String,
    pub recorded_at: DateTime<Utc>,
}

/// Resolved snapshot fields applied back onto a usage event.
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub id: i64,
    pub subscription_id: Option<i64>,
    pub subscription_item_id: Option<i64>,
    pub meter_id: Option<i64>,
    pub status: UsageStatus,
    pub snapshot_at: DateTime<Utc>,
}
