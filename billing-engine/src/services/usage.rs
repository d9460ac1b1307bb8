//! Usage ingestion: validated, idempotent writes of raw usage events with
//! best-effort write-time snapshot enrichment.

use crate::error::BillingError;
use crate::models::events::UsageIngestedPayload;
use crate::models::{IngestRequest, Meter, Subscription, SubscriptionItem, UsageEvent, UsageStatus};
use crate::services::Database;
use crate::services::cache::ResolverCache;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::metrics::{DB_QUERY_DURATION, record_usage_ingested};
use crate::services::outbox::Outbox;
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct UsageService {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    cache: Arc<ResolverCache>,
    outbox: Outbox,
}

impl UsageService {
    pub fn new(
        db: Database,
        idgen: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        cache: Arc<ResolverCache>,
        outbox: Outbox,
    ) -> Self {
        Self {
            db,
            idgen,
            clock,
            cache,
            outbox,
        }
    }

    /// Ingest one usage event. Duplicate idempotency keys are not errors:
    /// the previously stored row is returned unchanged.
    #[instrument(skip(self, req), fields(org_id = org_id, meter_code = %req.meter_code))]
    pub async fn ingest(
        &self,
        org_id: i64,
        req: IngestRequest,
    ) -> Result<UsageEvent, BillingError> {
        if org_id == 0 {
            return Err(BillingError::InvalidOrganization);
        }

        let customer_id = parse_id(&req.customer_id).ok_or(BillingError::InvalidCustomer)?;

        let meter_code = req.meter_code.trim().to_string();
        if meter_code.is_empty() {
            return Err(BillingError::InvalidMeterCode);
        }
        if req.value.is_nan() || req.value.is_infinite() {
            return Err(BillingError::InvalidValue);
        }

        if !self.db.customer_exists(org_id, customer_id).await? {
            return Err(BillingError::InvalidCustomer);
        }

        let idempotency_key = normalize_idempotency_key(req.idempotency_key.as_deref());
        let now = self.clock.now();
        let recorded_at = req.recorded_at.unwrap_or(now);

        // Best-effort snapshot: resolver misses or failures never fail
        // ingestion; the background worker fills the gaps.
        let meter = self.resolve_meter(org_id, &meter_code).await;
        let subscription = self
            .resolve_active_subscription(org_id, customer_id, recorded_at)
            .await;
        let item = match (&subscription, &meter) {
            (Some(sub), Some(m)) => self.resolve_subscription_item(org_id, sub.id, m.id, recorded_at).await,
            _ => None,
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["ingest_usage_event"])
            .start_timer();

        let record = UsageEvent {
            id: self.idgen.next_id(),
            org_id,
            customer_id,
            subscription_id: subscription.as_ref().map(|s| s.id),
            subscription_item_id: item.as_ref().map(|i| i.id),
            meter_id: meter.as_ref().map(|m| m.id),
            meter_code,
            value: req.value,
            recorded_at,
            status: UsageStatus::Accepted.as_str().to_string(),
            error: None,
            idempotency_key: idempotency_key.clone(),
            metadata: req.metadata,
            snapshot_at: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.insert_usage_event(&record).await?;
        let stored = if inserted {
            record
        } else if let Some(key) = idempotency_key.as_deref() {
            // Idempotent replay: another request with this key won.
            self.find_by_idempotency_key(org_id, key)
                .await?
                .ok_or(BillingError::InvalidEvent)?
        } else {
            record
        };

        timer.observe_duration();
        record_usage_ingested(org_id, &stored.meter_code);

        if inserted {
            self.emit_usage_ingested(&stored).await;
        }

        Ok(stored)
    }

    async fn insert_usage_event(&self, record: &UsageEvent) -> Result<bool, BillingError> {
        let conflict_clause = if record.idempotency_key.is_some() {
            "ON CONFLICT (org_id, idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING"
        } else {
            ""
        };
        let query = format!(
            r#"
            INSERT INTO usage_events (
                id, org_id, customer_id, subscription_id, subscription_item_id,
                meter_id, meter_code, value, recorded_at, status, error,
                idempotency_key, metadata, snapshot_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            {conflict_clause}
            "#
        );

        let result = sqlx::query(&query)
            .bind(record.id)
            .bind(record.org_id)
            .bind(record.customer_id)
            .bind(record.subscription_id)
            .bind(record.subscription_item_id)
            .bind(record.meter_id)
            .bind(&record.meter_code)
            .bind(record.value)
            .bind(record.recorded_at)
            .bind(&record.status)
            .bind(&record.error)
            .bind(&record.idempotency_key)
            .bind(&record.metadata)
            .bind(record.snapshot_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_idempotency_key(
        &self,
        org_id: i64,
        key: &str,
    ) -> Result<Option<UsageEvent>, BillingError> {
        let record = sqlx::query_as::<_, UsageEvent>(
            r#"
            SELECT id, org_id, customer_id, subscription_id, subscription_item_id,
                   meter_id, meter_code, value, recorded_at, status, error,
                   idempotency_key, metadata, snapshot_at, created_at, updated_at
            FROM usage_events
            WHERE org_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(org_id)
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    async fn resolve_meter(&self, org_id: i64, meter_code: &str) -> Option<Meter> {
        if let Some(cached) = self.cache.get_meter(org_id, meter_code) {
            return cached;
        }
        let meter = match self.db.find_meter_by_code(self.db.pool(), org_id, meter_code).await {
            Ok(meter) => meter,
            Err(e) => {
                warn!(error = %e, meter_code = meter_code, "Write-time meter resolution failed");
                return None;
            }
        };
        self.cache.set_meter(org_id, meter_code, meter.clone());
        meter
    }

    async fn resolve_active_subscription(
        &self,
        org_id: i64,
        customer_id: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Option<Subscription> {
        if let Some(cached) = self.cache.get_active_subscription(org_id, customer_id) {
            return cached;
        }
        let subscription = match self
            .db
            .find_active_subscription_at(self.db.pool(), org_id, customer_id, at)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, customer_id = customer_id, "Write-time subscription resolution failed");
                return None;
            }
        };
        self.cache
            .set_active_subscription(org_id, customer_id, subscription.clone());
        subscription
    }

    async fn resolve_subscription_item(
        &self,
        org_id: i64,
        subscription_id: i64,
        meter_id: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Option<SubscriptionItem> {
        if let Some(cached) = self.cache.get_subscription_item(subscription_id, meter_id) {
            return cached;
        }
        let item = match self
            .db
            .find_subscription_item_by_meter_at(self.db.pool(), org_id, subscription_id, meter_id, at)
            .await
        {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, subscription_id = subscription_id, "Write-time item resolution failed");
                return None;
            }
        };
        self.cache
            .set_subscription_item(subscription_id, meter_id, item.clone());
        item
    }

    async fn emit_usage_ingested(&self, record: &UsageEvent) {
        let event = UsageIngestedPayload {
            usage_event_id: record.id,
            org_id: record.org_id,
            customer_id: record.customer_id,
            meter_code: record.meter_code.clone(),
            subscription_id: record.subscription_id,
            subscription_item_id: record.subscription_item_id,
            meter_id: record.meter_id,
            idempotency_key: record.idempotency_key.clone(),
        }
        .into_event();

        if let Err(e) = self.outbox.publish(event).await {
            warn!(error = %e, usage_event_id = record.id, "Failed to publish usage.ingested");
        }
    }
}

fn parse_id(value: &str) -> Option<i64> {
    let parsed: i64 = value.trim().parse().ok()?;
    if parsed <= 0 { None } else { Some(parsed) }
}

fn normalize_idempotency_key(key: Option<&str>) -> Option<String> {
    let value = key?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_garbage_and_non_positive() {
        assert_eq!(parse_id(" 42 "), Some(42));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("-5"), None);
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn idempotency_keys_are_trimmed_to_null() {
        assert_eq!(normalize_idempotency_key(None), None);
        assert_eq!(normalize_idempotency_key(Some("  ")), None);
        assert_eq!(
            normalize_idempotency_key(Some(" k1 ")),
            Some("k1".to_string())
        );
    }
}
