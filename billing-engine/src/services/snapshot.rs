//! Background snapshot worker: resolves meter, subscription, and
//! subscription-item snapshots onto accepted usage rows.
//!
//! One cooperative loop per process. Each tick claims a batch of
//! `accepted` rows with `FOR UPDATE SKIP LOCKED`, enriches them inside the
//! same transaction, and commits the batch atomically; any failure rolls
//! the whole batch back and the next tick retries.

use crate::error::BillingError;
use crate::models::{SnapshotCandidate, SnapshotUpdate, UsageStatus};
use crate::services::Database;
use crate::services::clock::Clock;
use crate::services::metrics::{
    record_snapshot_lag, record_snapshot_processed, set_snapshot_backlog,
};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(2),
        }
    }
}

const BATCH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SnapshotWorker {
    db: Database,
    clock: Arc<dyn Clock>,
    cfg: SnapshotConfig,
}

impl SnapshotWorker {
    pub fn new(db: Database, clock: Arc<dyn Clock>, cfg: SnapshotConfig) -> Self {
        Self { db, clock, cfg }
    }

    /// Run until the shutdown channel flips. Failed ticks are logged and
    /// retried on the next interval.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Usage snapshot run failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Snapshot worker shutting down");
                    return;
                }
            }
        }
    }

    /// Process one batch with a hard per-batch timeout.
    pub async fn run_once(&self) -> Result<usize, BillingError> {
        let processed = match tokio::time::timeout(
            BATCH_TIMEOUT,
            self.process_batch(self.cfg.batch_size),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Snapshot batch timed out, will retry next tick");
                0
            }
        };
        self.refresh_backlog_gauges().await?;
        Ok(processed)
    }

    #[instrument(skip(self))]
    pub async fn process_batch(&self, limit: i64) -> Result<usize, BillingError> {
        let mut tx = self.db.pool().begin().await?;

        let rows = self.lock_accepted(&mut tx, limit).await?;
        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let now = self.clock.now();
        let mut processed = 0;
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let update = self.build_snapshot(&mut tx, &row, now).await?;
            let lag = (now - row.recorded_at).num_milliseconds() as f64 / 1000.0;
            outcomes.push((update.status, lag));
            self.apply_snapshot(&mut tx, &update).await?;
            processed += 1;
        }

        tx.commit().await?;

        for (status, lag) in outcomes {
            record_snapshot_processed(status.as_str());
            record_snapshot_lag(status.as_str(), lag);
        }

        Ok(processed)
    }

    /// Claim up to `limit` accepted rows, oldest ids first. `SKIP LOCKED`
    /// keeps concurrent workers from stalling on each other's batches.
    async fn lock_accepted(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: i64,
    ) -> Result<Vec<SnapshotCandidate>, BillingError> {
        let rows = sqlx::query_as::<_, SnapshotCandidate>(
            r#"
            SELECT id, org_id, customer_id, meter_code, recorded_at
            FROM usage_events
            WHERE status = 'accepted'
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    async fn build_snapshot(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row: &SnapshotCandidate,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<SnapshotUpdate, BillingError> {
        let mut update = SnapshotUpdate {
            id: row.id,
            subscription_id: None,
            subscription_item_id: None,
            meter_id: None,
            status: UsageStatus::Enriched,
            snapshot_at: now,
        };

        let meter_code = row.meter_code.trim();
        let meter = self
            .db
            .find_meter_by_code(&mut **tx, row.org_id, meter_code)
            .await?;
        let Some(meter) = meter else {
            update.status = UsageStatus::UnmatchedMeter;
            return Ok(update);
        };

        let subscription = self
            .db
            .find_active_subscription_at(&mut **tx, row.org_id, row.customer_id, row.recorded_at)
            .await?;
        let Some(subscription) = subscription else {
            update.status = UsageStatus::UnmatchedSubscription;
            return Ok(update);
        };
        update.subscription_id = Some(subscription.id);
        update.meter_id = Some(meter.id);

        // A matched meter without a billed item stays enriched: the row is
        // kept but does not rate.
        let item = self
            .db
            .find_subscription_item_by_meter_at(
                &mut **tx,
                row.org_id,
                subscription.id,
                meter.id,
                row.recorded_at,
            )
            .await?;
        if let Some(item) = item {
            update.subscription_item_id = Some(item.id);
        }

        Ok(update)
    }

    async fn apply_snapshot(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        update: &SnapshotUpdate,
    ) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            UPDATE usage_events
            SET subscription_id = $2,
                subscription_item_id = $3,
                meter_id = $4,
                status = $5,
                snapshot_at = $6,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(update.id)
        .bind(update.subscription_id)
        .bind(update.subscription_item_id)
        .bind(update.meter_id)
        .bind(update.status.as_str())
        .bind(update.snapshot_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn refresh_backlog_gauges(&self) -> Result<(), BillingError> {
        #[derive(sqlx::FromRow)]
        struct StatusCount {
            status: String,
            count: i64,
        }

        let counts = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(1) AS count FROM usage_events GROUP BY status",
        )
        .fetch_all(self.db.pool())
        .await?;

        for status in [
            UsageStatus::Accepted,
            UsageStatus::Enriched,
            UsageStatus::Rated,
            UsageStatus::UnmatchedMeter,
            UsageStatus::UnmatchedSubscription,
        ] {
            let count = counts
                .iter()
                .find(|c| c.status == status.as_str())
                .map(|c| c.count)
                .unwrap_or(0);
            set_snapshot_backlog(status.as_str(), count);
        }
        Ok(())
    }
}
