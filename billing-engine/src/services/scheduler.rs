//! Billing-cycle scheduler: drives cycles through
//! OPEN -> CLOSING -> CLOSED under row-level locks.
//!
//! Multiple replicas coordinate only through `FOR UPDATE` /
//! `FOR UPDATE SKIP LOCKED` and predecessor-status guards on every
//! transition UPDATE; a transition that loses the race affects zero rows
//! and is a no-op.

use crate::error::BillingError;
use crate::models::events::{InvoicePayload, event_types};
use crate::models::{
    BillingCycle, BillingCycleStatus, BillingCycleType, EntryLine, InvoiceStatus,
    SubscriptionStatus, account_codes, ledger::Direction, source_types,
};
use crate::services::Database;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::ledger::LedgerService;
use crate::services::metrics::{DB_QUERY_DURATION, record_cycle_transition, record_error};
use crate::services::outbox::Outbox;
use crate::services::rating::RatingService;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Months, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: i64,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            tick_interval: Duration::from_secs(15),
        }
    }
}

/// Outcome reported by the external invoice generator for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceOutcome {
    /// Nothing issued yet; retry next tick.
    Pending,
    /// An invoice exists but is not yet terminal.
    Issued { invoice_id: i64 },
    /// The invoice reached FINALIZED.
    Finalized { invoice_id: i64 },
    /// The invoice reached VOID.
    Voided { invoice_id: i64 },
}

/// Seam to the external invoice generator. The engine only records latches
/// and publishes lifecycle events from what the driver reports.
#[async_trait]
pub trait InvoiceDriver: Send + Sync {
    async fn issue_invoice(&self, cycle: &BillingCycle) -> Result<InvoiceOutcome, BillingError>;
}

/// Driver used when no invoice generator is wired; cycles stay CLOSED with
/// unset invoice latches until a real driver reports back.
pub struct NullInvoiceDriver;

#[async_trait]
impl InvoiceDriver for NullInvoiceDriver {
    async fn issue_invoice(&self, _cycle: &BillingCycle) -> Result<InvoiceOutcome, BillingError> {
        Ok(InvoiceOutcome::Pending)
    }
}

/// A subscription claimed for cycle-opening work.
#[derive(Debug, Clone, FromRow)]
struct WorkSubscription {
    id: i64,
    org_id: i64,
    activated_at: Option<DateTime<Utc>>,
    billing_cycle_type: String,
    custom_period_days: Option<i32>,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    clock: Arc<dyn Clock>,
    idgen: Arc<IdGenerator>,
    rating: RatingService,
    ledger: LedgerService,
    outbox: Outbox,
    invoices: Arc<dyn InvoiceDriver>,
    cfg: SchedulerConfig,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        idgen: Arc<IdGenerator>,
        rating: RatingService,
        ledger: LedgerService,
        outbox: Outbox,
        invoices: Arc<dyn InvoiceDriver>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            clock,
            idgen,
            rating,
            ledger,
            outbox,
            invoices,
            cfg,
        }
    }

    /// Run until the shutdown channel flips.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Cycle scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over all pending work. Per-cycle failures are latched into
    /// `last_error` and retried on the next tick; they never abort the pass.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<(), BillingError> {
        self.open_missing_cycles().await?;
        self.close_due_cycles().await?;
        self.process_closing_cycles().await?;
        self.drive_invoices().await?;
        self.end_canceled_subscriptions().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Step 1: open a cycle for every ACTIVE subscription that lacks one
    // -------------------------------------------------------------------------

    pub async fn open_missing_cycles(&self) -> Result<usize, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["open_missing_cycles"])
            .start_timer();

        let now = self.clock.now();
        let mut opened = 0;
        let mut tx = self.db.pool().begin().await?;

        let subscriptions = sqlx::query_as::<_, WorkSubscription>(
            r#"
            SELECT id, org_id, activated_at, billing_cycle_type, custom_period_days
            FROM subscriptions s
            WHERE status = 'ACTIVE'
              AND NOT EXISTS (
                  SELECT 1 FROM billing_cycles bc
                  WHERE bc.subscription_id = s.id AND bc.status = 'OPEN'
              )
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#,
        )
        .bind(self.cfg.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        for subscription in subscriptions {
            let previous_end = self
                .find_last_cycle_end(&mut tx, subscription.org_id, subscription.id)
                .await?;
            let Some((period_start, period_end)) = compute_period(&subscription, previous_end)
            else {
                debug!(
                    subscription_id = subscription.id,
                    "Subscription not schedulable, skipping cycle open"
                );
                continue;
            };

            let result = sqlx::query(
                r#"
                INSERT INTO billing_cycles (
                    id, org_id, subscription_id, period_start, period_end, status,
                    opened_at, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, 'OPEN', $6, $6, $6)
                ON CONFLICT (subscription_id, period_start, period_end) DO NOTHING
                "#,
            )
            .bind(self.idgen.next_id())
            .bind(subscription.org_id)
            .bind(subscription.id)
            .bind(period_start)
            .bind(period_end)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                opened += 1;
                record_cycle_transition("opened");
                info!(
                    subscription_id = subscription.id,
                    period_start = %period_start,
                    period_end = %period_end,
                    "Billing cycle opened"
                );
            }
        }

        tx.commit().await?;
        timer.observe_duration();
        Ok(opened)
    }

    async fn find_last_cycle_end(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: i64,
        subscription_id: i64,
    ) -> Result<Option<DateTime<Utc>>, BillingError> {
        let end: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT period_end
            FROM billing_cycles
            WHERE org_id = $1 AND subscription_id = $2
            ORDER BY period_end DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(end)
    }

    // -------------------------------------------------------------------------
    // Step 2: OPEN -> CLOSING for every cycle past its period end
    // -------------------------------------------------------------------------

    pub async fn close_due_cycles(&self) -> Result<usize, BillingError> {
        let now = self.clock.now();
        let cycles = self
            .fetch_cycles_for_work("status = 'OPEN' AND period_end <= $2", Some(now))
            .await?;

        let mut transitioned = 0;
        for cycle in cycles {
            match self.mark_cycle_closing(cycle.id).await {
                Ok(true) => transitioned += 1,
                Ok(false) => {}
                Err(e) => {
                    self.record_cycle_error(cycle.id, &e).await;
                }
            }
        }
        Ok(transitioned)
    }

    /// OPEN -> CLOSING under an exclusive row lock. Returns whether this
    /// caller performed the transition.
    pub async fn mark_cycle_closing(&self, cycle_id: i64) -> Result<bool, BillingError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let Some(cycle) = self.lock_cycle_for_update(&mut tx, cycle_id).await? else {
            tx.rollback().await?;
            return Ok(false);
        };
        if cycle.parsed_status() != BillingCycleStatus::Open || now < cycle.period_end {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE billing_cycles
            SET status = 'CLOSING',
                closing_started_at = COALESCE(closing_started_at, $2),
                updated_at = $2
            WHERE id = $1 AND status = 'OPEN'
            "#,
        )
        .bind(cycle_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let updated = result.rows_affected() > 0;
        if updated {
            record_cycle_transition("closing");
            info!(billing_cycle_id = cycle_id, "Billing cycle closing");
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Step 3: rate, post the cycle-total ledger entry, and close
    // -------------------------------------------------------------------------

    pub async fn process_closing_cycles(&self) -> Result<usize, BillingError> {
        let cycles = self
            .fetch_cycles_for_work("status = 'CLOSING'", None)
            .await?;

        let mut closed = 0;
        for cycle in cycles {
            match self.settle_closing_cycle(&cycle).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        billing_cycle_id = cycle.id,
                        error = %e,
                        "Failed to settle closing cycle"
                    );
                    record_error(&e.code(), "settle_closing_cycle");
                    self.record_cycle_error(cycle.id, &e).await;
                }
            }
        }
        Ok(closed)
    }

    async fn settle_closing_cycle(&self, cycle: &BillingCycle) -> Result<bool, BillingError> {
        self.rating.run_rating(cycle.id).await?;
        self.ensure_ledger_entry_for_cycle(cycle).await?;
        self.mark_rating_completed(cycle.id).await?;
        self.mark_cycle_closed(cycle.id).await
    }

    /// Post the cycle-total AR/revenue entry exactly once per cycle. A
    /// crash after posting but before the CLOSED transition must not
    /// double-post on retry, hence the source lookup first.
    async fn ensure_ledger_entry_for_cycle(
        &self,
        cycle: &BillingCycle,
    ) -> Result<(), BillingError> {
        if self
            .ledger
            .find_entry_by_source(cycle.org_id, source_types::BILLING_CYCLE, cycle.id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let summary = self.summarize_rating_results(cycle.org_id, cycle.id).await?;

        let ar_id = self
            .ledger
            .ensure_account(
                cycle.org_id,
                account_codes::ACCOUNTS_RECEIVABLE,
                "Accounts Receivable",
            )
            .await?;
        let revenue_id = self
            .ledger
            .ensure_account(cycle.org_id, account_codes::REVENUE, "Revenue (Usage)")
            .await?;

        let lines = [
            EntryLine {
                account_id: ar_id,
                direction: Direction::Debit,
                amount: summary.total,
            },
            EntryLine {
                account_id: revenue_id,
                direction: Direction::Credit,
                amount: summary.total,
            },
        ];

        self.ledger
            .create_entry(
                cycle.org_id,
                source_types::BILLING_CYCLE,
                cycle.id,
                &summary.currency,
                cycle.period_end,
                &lines,
            )
            .await?;
        Ok(())
    }

    async fn summarize_rating_results(
        &self,
        org_id: i64,
        billing_cycle_id: i64,
    ) -> Result<RatingSummary, BillingError> {
        #[derive(FromRow)]
        struct Row {
            currency: String,
            total: i64,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT currency, SUM(amount)::BIGINT AS total
            FROM rating_results
            WHERE org_id = $1 AND billing_cycle_id = $2
            GROUP BY currency
            "#,
        )
        .bind(org_id)
        .bind(billing_cycle_id)
        .fetch_all(self.db.pool())
        .await?;

        if rows.is_empty() {
            return Err(BillingError::MissingRatingResults);
        }
        if rows.len() > 1 {
            return Err(BillingError::CurrencyMismatch);
        }
        if rows[0].total < 0 {
            return Err(BillingError::InvalidLineAmount);
        }

        Ok(RatingSummary {
            currency: rows[0].currency.clone(),
            total: rows[0].total,
        })
    }

    /// Latch `rating_completed_at` on a CLOSING cycle and clear any error.
    pub async fn mark_rating_completed(&self, cycle_id: i64) -> Result<(), BillingError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let Some(cycle) = self.lock_cycle_for_update(&mut tx, cycle_id).await? else {
            tx.rollback().await?;
            return Ok(());
        };
        if cycle.parsed_status() != BillingCycleStatus::Closing {
            tx.rollback().await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE billing_cycles
            SET rating_completed_at = COALESCE(rating_completed_at, $2),
                last_error = NULL,
                last_error_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'CLOSING'
            "#,
        )
        .bind(cycle_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// CLOSING -> CLOSED, allowed only once rating has completed. Returns
    /// whether this caller performed the transition.
    pub async fn mark_cycle_closed(&self, cycle_id: i64) -> Result<bool, BillingError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let Some(cycle) = self.lock_cycle_for_update(&mut tx, cycle_id).await? else {
            tx.rollback().await?;
            return Ok(false);
        };
        if cycle.parsed_status() != BillingCycleStatus::Closing {
            tx.rollback().await?;
            return Ok(false);
        }
        if cycle.rating_completed_at.is_none() {
            tx.rollback().await?;
            return Err(BillingError::MissingRatingResults);
        }

        let result = sqlx::query(
            r#"
            UPDATE billing_cycles
            SET status = 'CLOSED',
                closed_at = COALESCE(closed_at, $2),
                last_error = NULL,
                last_error_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'CLOSING' AND rating_completed_at IS NOT NULL
            "#,
        )
        .bind(cycle_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let updated = result.rows_affected() > 0;
        if updated {
            record_cycle_transition("closed");
            info!(billing_cycle_id = cycle_id, "Billing cycle closed");
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Step 4: drive the external invoice generator and latch its outcomes
    // -------------------------------------------------------------------------

    pub async fn drive_invoices(&self) -> Result<usize, BillingError> {
        let cycles = self
            .fetch_cycles_for_work(
                "status = 'CLOSED' AND (invoiced_at IS NULL OR invoice_finalized_at IS NULL)",
                None,
            )
            .await?;

        let mut advanced = 0;
        for cycle in cycles {
            match self.invoices.issue_invoice(&cycle).await {
                Ok(InvoiceOutcome::Pending) => {}
                Ok(InvoiceOutcome::Issued { .. }) => {
                    self.mark_cycle_invoiced(cycle.id).await?;
                    advanced += 1;
                }
                Ok(InvoiceOutcome::Finalized { invoice_id }) => {
                    self.mark_cycle_invoiced(cycle.id).await?;
                    self.mark_cycle_invoice_finalized(cycle.id).await?;
                    self.publish_invoice_event(&cycle, invoice_id, event_types::INVOICE_FINALIZED)
                        .await;
                    advanced += 1;
                }
                Ok(InvoiceOutcome::Voided { invoice_id }) => {
                    self.mark_cycle_invoiced(cycle.id).await?;
                    self.mark_cycle_invoice_finalized(cycle.id).await?;
                    self.publish_invoice_event(&cycle, invoice_id, event_types::INVOICE_VOIDED)
                        .await;
                    advanced += 1;
                }
                Err(e) => {
                    record_error(&e.code(), "drive_invoices");
                    self.record_cycle_error(cycle.id, &e).await;
                }
            }
        }
        Ok(advanced)
    }

    async fn publish_invoice_event(&self, cycle: &BillingCycle, invoice_id: i64, event_type: &str) {
        let event = InvoicePayload {
            invoice_id,
            org_id: cycle.org_id,
            billing_cycle_id: cycle.id,
        }
        .into_event(event_type);
        if let Err(e) = self.outbox.publish(event).await {
            warn!(error = %e, billing_cycle_id = cycle.id, "Failed to publish invoice event");
        }
    }

    /// Latch `invoiced_at` on a CLOSED cycle.
    pub async fn mark_cycle_invoiced(&self, cycle_id: i64) -> Result<(), BillingError> {
        self.latch_closed_cycle(cycle_id, "invoiced_at", "invoiced").await
    }

    /// Latch `invoice_finalized_at` on a CLOSED cycle.
    pub async fn mark_cycle_invoice_finalized(&self, cycle_id: i64) -> Result<(), BillingError> {
        self.latch_closed_cycle(cycle_id, "invoice_finalized_at", "invoice_finalized")
            .await
    }

    async fn latch_closed_cycle(
        &self,
        cycle_id: i64,
        column: &str,
        transition: &str,
    ) -> Result<(), BillingError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let Some(cycle) = self.lock_cycle_for_update(&mut tx, cycle_id).await? else {
            tx.rollback().await?;
            return Ok(());
        };
        if cycle.parsed_status() != BillingCycleStatus::Closed {
            tx.rollback().await?;
            return Ok(());
        }

        // Column names come from the two call sites above, never from input.
        let query = format!(
            r#"
            UPDATE billing_cycles
            SET {column} = COALESCE({column}, $2),
                last_error = NULL,
                last_error_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'CLOSED'
            "#
        );
        sqlx::query(&query)
            .bind(cycle_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        record_cycle_transition(transition);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Step 5: move CANCELED subscriptions to ENDED once fully settled
    // -------------------------------------------------------------------------

    pub async fn end_canceled_subscriptions(&self) -> Result<usize, BillingError> {
        let subscriptions = {
            let mut tx = self.db.pool().begin().await?;
            let rows = sqlx::query_as::<_, WorkSubscription>(
                r#"
                SELECT id, org_id, activated_at, billing_cycle_type, custom_period_days
                FROM subscriptions
                WHERE status = 'CANCELED'
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT $1
                "#,
            )
            .bind(self.cfg.batch_size)
            .fetch_all(&mut *tx)
            .await?;
            tx.commit().await?;
            rows
        };

        let mut ended = 0;
        for subscription in subscriptions {
            if !self
                .can_end_subscription(subscription.org_id, subscription.id)
                .await?
            {
                continue;
            }
            let result = sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = $2, updated_at = $3
                WHERE id = $1 AND status = 'CANCELED'
                "#,
            )
            .bind(subscription.id)
            .bind(SubscriptionStatus::Ended.as_str())
            .bind(self.clock.now())
            .execute(self.db.pool())
            .await?;
            if result.rows_affected() > 0 {
                ended += 1;
                record_cycle_transition("subscription_ended");
                info!(subscription_id = subscription.id, "Subscription ended");
            }
        }
        Ok(ended)
    }

    /// A subscription may end only when it has no OPEN/CLOSING cycles and
    /// every CLOSED cycle carries an invoice in a terminal state.
    pub async fn can_end_subscription(
        &self,
        org_id: i64,
        subscription_id: i64,
    ) -> Result<bool, BillingError> {
        let open_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(1)
            FROM billing_cycles
            WHERE org_id = $1 AND subscription_id = $2 AND status IN ('OPEN', 'CLOSING')
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .fetch_one(self.db.pool())
        .await?;
        if open_count > 0 {
            return Ok(false);
        }

        let unsettled_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(1)
            FROM billing_cycles bc
            LEFT JOIN invoices i ON i.billing_cycle_id = bc.id
            WHERE bc.org_id = $1 AND bc.subscription_id = $2 AND bc.status = 'CLOSED'
              AND (i.id IS NULL OR i.status NOT IN ($3, $4))
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .bind(InvoiceStatus::Finalized.as_str())
        .bind(InvoiceStatus::Void.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(unsettled_count == 0)
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    /// Harvest a batch of candidate cycles. The claiming transaction ends
    /// with the fetch; each transition re-locks its row and re-checks the
    /// predecessor status, so a stale candidate is merely a no-op.
    async fn fetch_cycles_for_work(
        &self,
        predicate: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<BillingCycle>, BillingError> {
        let query = format!(
            r#"
            SELECT id, org_id, subscription_id, period_start, period_end, status,
                   opened_at, closing_started_at, rating_completed_at, invoiced_at,
                   invoice_finalized_at, closed_at, last_error, last_error_at,
                   created_at, updated_at
            FROM billing_cycles
            WHERE {predicate}
            ORDER BY period_end ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#
        );

        let mut tx = self.db.pool().begin().await?;
        let mut q = sqlx::query_as::<_, BillingCycle>(&query).bind(self.cfg.batch_size);
        if let Some(now) = now {
            q = q.bind(now);
        }
        let cycles = q.fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(cycles)
    }

    async fn lock_cycle_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        cycle_id: i64,
    ) -> Result<Option<BillingCycle>, BillingError> {
        let cycle = sqlx::query_as::<_, BillingCycle>(
            r#"
            SELECT id, org_id, subscription_id, period_start, period_end, status,
                   opened_at, closing_started_at, rating_completed_at, invoiced_at,
                   invoice_finalized_at, closed_at, last_error, last_error_at,
                   created_at, updated_at
            FROM billing_cycles
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(cycle)
    }

    /// Latch the most recent failure onto the cycle; cleared by the next
    /// successful transition.
    pub async fn record_cycle_error(&self, cycle_id: i64, err: &BillingError) {
        let now = self.clock.now();
        let result = sqlx::query(
            r#"
            UPDATE billing_cycles
            SET last_error = $2, last_error_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(cycle_id)
        .bind(err.to_string())
        .bind(now)
        .execute(self.db.pool())
        .await;
        if let Err(update_err) = result {
            warn!(
                billing_cycle_id = cycle_id,
                error = %update_err,
                "Failed to record cycle error"
            );
        }
    }

}

struct RatingSummary {
    currency: String,
    total: i64,
}

/// Compute the next `[period_start, period_end)` for a subscription.
/// MONTHLY periods are anchored to the activation instant's day-of-month
/// and step calendar months (clamping short months); CUSTOM periods step
/// `custom_period_days`. Returns `None` when the subscription carries no
/// usable calendar.
fn compute_period(
    subscription: &WorkSubscription,
    previous_end: Option<DateTime<Utc>>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let anchor = subscription.activated_at?;
    let period_start = previous_end.unwrap_or(anchor);

    let period_end = match BillingCycleType::from_string(&subscription.billing_cycle_type) {
        BillingCycleType::Monthly => next_month_anchor(anchor, period_start)?,
        BillingCycleType::Custom => {
            let days = subscription.custom_period_days.filter(|d| *d > 0)?;
            period_start.checked_add_days(Days::new(days as u64))?
        }
    };

    if period_end <= period_start {
        return None;
    }
    Some((period_start, period_end))
}

/// The earliest `anchor + k months` strictly after `after`. Each boundary
/// is derived from the original anchor, so a Jan 31 anchor yields Feb 28
/// and then Mar 31 rather than drifting to the clamped day.
fn next_month_anchor(anchor: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut k = months_between(anchor, after);
    loop {
        let candidate = anchor.checked_add_months(Months::new(k))?;
        if candidate > after {
            return Some(candidate);
        }
        k += 1;
    }
}

fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let months =
        (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    months.max(0) as u32
}
