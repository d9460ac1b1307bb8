//! Rating: deterministic aggregation of enriched usage into per-cycle
//! rated line items keyed by a content checksum.

use crate::error::BillingError;
use crate::models::{BillingCycle, BillingCycleStatus, PriceAmount, RatingResult, SubscriptionItem, UsageStatus};
use crate::services::Database;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument};

const RATING_SOURCE: &str = "usage_events";

#[derive(Clone)]
pub struct RatingService {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl RatingService {
    pub fn new(db: Database, idgen: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { db, idgen, clock }
    }

    /// Rate every subscription item of a CLOSING cycle. Re-runs are
    /// idempotent: each line's checksum collides and the insert is skipped.
    #[instrument(skip(self), fields(billing_cycle_id = billing_cycle_id))]
    pub async fn run_rating(&self, billing_cycle_id: i64) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["run_rating"])
            .start_timer();

        let cycle = self
            .load_billing_cycle(billing_cycle_id)
            .await?
            .ok_or(BillingError::BillingCycleNotFound)?;
        if cycle.parsed_status() != BillingCycleStatus::Closing {
            return Err(BillingError::BillingCycleNotClosing);
        }
        if cycle.period_end <= cycle.period_start {
            return Err(BillingError::InvalidBillingCycle);
        }

        let items = self
            .list_subscription_items(cycle.org_id, cycle.subscription_id)
            .await?;

        let now = self.clock.now();
        for item in items {
            let meter_id = item.meter_id.ok_or(BillingError::MissingMeter)?;

            let quantity = self
                .aggregate_usage(
                    cycle.org_id,
                    cycle.subscription_id,
                    meter_id,
                    cycle.period_start,
                    cycle.period_end,
                )
                .await?;
            if quantity < 0.0 {
                return Err(BillingError::InvalidQuantity);
            }

            let price_amount = self
                .load_price_amount(cycle.org_id, item.price_id, meter_id)
                .await?
                .ok_or(BillingError::MissingPriceAmount)?;

            let unit_price = price_amount.unit_amount_cents;
            let amount = round_half_away(quantity * unit_price as f64);
            let checksum = build_checksum(
                cycle.id,
                cycle.subscription_id,
                meter_id,
                item.price_id,
                cycle.period_start,
                cycle.period_end,
            );

            self.insert_rating_result(&RatingResult {
                id: self.idgen.next_id(),
                org_id: cycle.org_id,
                subscription_id: cycle.subscription_id,
                billing_cycle_id: cycle.id,
                meter_id,
                price_id: item.price_id,
                quantity,
                unit_price,
                amount,
                currency: price_amount.currency.clone(),
                period_start: cycle.period_start,
                period_end: cycle.period_end,
                source: RATING_SOURCE.to_string(),
                checksum,
                created_at: now,
            })
            .await?;
        }

        self.mark_usage_rated(&cycle, now).await?;

        timer.observe_duration();
        info!(
            billing_cycle_id = cycle.id,
            subscription_id = cycle.subscription_id,
            "Rating pass completed"
        );
        Ok(())
    }

    async fn load_billing_cycle(&self, id: i64) -> Result<Option<BillingCycle>, BillingError> {
        let cycle = sqlx::query_as::<_, BillingCycle>(
            r#"
            SELECT id, org_id, subscription_id, period_start, period_end, status,
                   opened_at, closing_started_at, rating_completed_at, invoiced_at,
                   invoice_finalized_at, closed_at, last_error, last_error_at,
                   created_at, updated_at
            FROM billing_cycles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(cycle)
    }

    async fn list_subscription_items(
        &self,
        org_id: i64,
        subscription_id: i64,
    ) -> Result<Vec<SubscriptionItem>, BillingError> {
        let items = sqlx::query_as::<_, SubscriptionItem>(
            r#"
            SELECT id, org_id, subscription_id, price_id, meter_id,
                   effective_from, effective_to, created_at
            FROM subscription_items
            WHERE org_id = $1 AND subscription_id = $2
            ORDER BY id
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    async fn aggregate_usage(
        &self,
        org_id: i64,
        subscription_id: i64,
        meter_id: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<f64, BillingError> {
        let quantity: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(value), 0)::FLOAT8
            FROM usage_events
            WHERE org_id = $1 AND subscription_id = $2 AND meter_id = $3
              AND recorded_at >= $4 AND recorded_at < $5
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .bind(meter_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(self.db.pool())
        .await?;
        Ok(quantity)
    }

    /// Resolve the price amount for `(org, price)` preferring a meter match
    /// over the meter-null default.
    async fn load_price_amount(
        &self,
        org_id: i64,
        price_id: i64,
        meter_id: i64,
    ) -> Result<Option<PriceAmount>, BillingError> {
        let amount = sqlx::query_as::<_, PriceAmount>(
            r#"
            SELECT id, org_id, price_id, meter_id, currency, unit_amount_cents,
                   effective_from, effective_to, created_at
            FROM price_amounts
            WHERE org_id = $1 AND price_id = $2 AND (meter_id = $3 OR meter_id IS NULL)
            ORDER BY CASE WHEN meter_id = $3 THEN 0 ELSE 1 END
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(price_id)
        .bind(meter_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(amount)
    }

    async fn insert_rating_result(&self, result: &RatingResult) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            INSERT INTO rating_results (
                id, org_id, subscription_id, billing_cycle_id, meter_id, price_id,
                quantity, unit_price, amount, currency, period_start, period_end,
                source, checksum, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (checksum) DO NOTHING
            "#,
        )
        .bind(result.id)
        .bind(result.org_id)
        .bind(result.subscription_id)
        .bind(result.billing_cycle_id)
        .bind(result.meter_id)
        .bind(result.price_id)
        .bind(result.quantity)
        .bind(result.unit_price)
        .bind(result.amount)
        .bind(&result.currency)
        .bind(result.period_start)
        .bind(result.period_end)
        .bind(&result.source)
        .bind(&result.checksum)
        .bind(result.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Flip the cycle window's enriched usage to `rated`.
    async fn mark_usage_rated(
        &self,
        cycle: &BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            UPDATE usage_events
            SET status = $1, updated_at = $2
            WHERE org_id = $3 AND subscription_id = $4
              AND recorded_at >= $5 AND recorded_at < $6
              AND status = $7
            "#,
        )
        .bind(UsageStatus::Rated.as_str())
        .bind(now)
        .bind(cycle.org_id)
        .bind(cycle.subscription_id)
        .bind(cycle.period_start)
        .bind(cycle.period_end)
        .bind(UsageStatus::Enriched.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

/// Half-away-from-zero rounding of a fractional minor-unit amount.
fn round_half_away(value: f64) -> i64 {
    value.round() as i64
}

/// Content hash that makes rating row insertion idempotent across retries.
fn build_checksum(
    billing_cycle_id: i64,
    subscription_id: i64,
    meter_id: i64,
    price_id: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}|{}",
        billing_cycle_id,
        subscription_id,
        meter_id,
        price_id,
        period_start.to_rfc3339_opts(SecondsFormat::Nanos, true),
        period_end.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    hex::encode(Sha256::digest(payload.as_bytes()))
}
