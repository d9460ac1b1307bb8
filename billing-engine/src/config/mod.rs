//! Engine configuration, loaded from the environment.

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub snapshot: SnapshotSettings,
    pub scheduler: SchedulerSettings,
    pub idgen: IdGenSettings,
    pub payments: PaymentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSettings {
    pub batch_size: i64,
    pub poll_interval_ms: u64,
}

impl SnapshotSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub batch_size: i64,
    pub tick_interval_ms: u64,
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdGenSettings {
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSettings {
    /// Master secret for provider-config decryption. Empty disables
    /// webhook settlement with `encryption_key_missing`.
    pub config_secret: Secret<String>,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("BILLING_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?;

        let database_url =
            env::var("BILLING_DATABASE_URL").expect("BILLING_DATABASE_URL must be set");
        let max_connections = env::var("BILLING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("BILLING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let snapshot_batch_size = env::var("SNAPSHOT_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()?;
        let snapshot_poll_interval_ms = env::var("SNAPSHOT_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()?;

        let scheduler_batch_size = env::var("SCHEDULER_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()?;
        let scheduler_tick_interval_ms = env::var("SCHEDULER_TICK_INTERVAL_MS")
            .unwrap_or_else(|_| "15000".to_string())
            .parse()?;

        let node_id = env::var("IDGEN_NODE_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let config_secret =
            env::var("PAYMENT_PROVIDER_CONFIG_SECRET").unwrap_or_else(|_| "".to_string());

        Ok(Self {
            common: CoreConfig { port },
            service_name: "billing-engine".to_string(),
            log_level: env::var("BILLING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                min_connections,
            },
            snapshot: SnapshotSettings {
                batch_size: snapshot_batch_size,
                poll_interval_ms: snapshot_poll_interval_ms,
            },
            scheduler: SchedulerSettings {
                batch_size: scheduler_batch_size,
                tick_interval_ms: scheduler_tick_interval_ms,
            },
            idgen: IdGenSettings { node_id },
            payments: PaymentSettings {
                config_secret: Secret::new(config_secret),
            },
        })
    }
}
