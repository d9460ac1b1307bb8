//! Database pool wrapper and shared entity lookups.
//!
//! Each engine service owns the queries for its tables; this type carries
//! the pool plus the handful of reads shared between ingestion and the
//! snapshot worker. Lookup methods take an executor so callers can run them
//! against the pool or inside an open transaction.

use crate::error::BillingError;
use crate::models::{Meter, Subscription, SubscriptionItem};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-engine"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, BillingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), BillingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Internal(anyhow::anyhow!("Migration failed: {e}")))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Whether a customer exists for the org.
    pub async fn customer_exists(&self, org_id: i64, customer_id: i64) -> Result<bool, BillingError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM customers WHERE org_id = $1 AND id = $2)",
        )
        .bind(org_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Customer display name, empty when missing.
    pub async fn customer_name(&self, org_id: i64, customer_id: i64) -> Result<String, BillingError> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT name FROM customers WHERE org_id = $1 AND id = $2")
                .bind(org_id)
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(name.map(|n| n.trim().to_string()).unwrap_or_default())
    }

    /// Look up a meter by its ingestion code.
    pub async fn find_meter_by_code<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        org_id: i64,
        code: &str,
    ) -> Result<Option<Meter>, BillingError> {
        let meter = sqlx::query_as::<_, Meter>(
            r#"
            SELECT id, org_id, code, name, created_at
            FROM meters
            WHERE org_id = $1 AND code = $2
            "#,
        )
        .bind(org_id)
        .bind(code)
        .fetch_optional(executor)
        .await?;
        Ok(meter)
    }

    /// The subscription that was ACTIVE for the customer at the given
    /// instant, if any.
    pub async fn find_active_subscription_at<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        org_id: i64,
        customer_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, BillingError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, org_id, customer_id, status, activated_at,
                   billing_cycle_type, custom_period_days, created_at, updated_at
            FROM subscriptions
            WHERE org_id = $1 AND customer_id = $2 AND status = 'ACTIVE'
              AND activated_at IS NOT NULL AND activated_at <= $3
            ORDER BY activated_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(customer_id)
        .bind(at)
        .fetch_optional(executor)
        .await?;
        Ok(subscription)
    }

    /// The subscription item billing the given meter that was effective at
    /// the given instant, if any.
    pub async fn find_subscription_item_by_meter_at<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        org_id: i64,
        subscription_id: i64,
        meter_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<SubscriptionItem>, BillingError> {
        let item = sqlx::query_as::<_, SubscriptionItem>(
            r#"
            SELECT id, org_id, subscription_id, price_id, meter_id,
                   effective_from, effective_to, created_at
            FROM subscription_items
            WHERE org_id = $1 AND subscription_id = $2 AND meter_id = $3
              AND (effective_from IS NULL OR effective_from <= $4)
              AND (effective_to IS NULL OR effective_to > $4)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .bind(meter_id)
        .bind(at)
        .fetch_optional(executor)
        .await?;
        Ok(item)
    }
}
