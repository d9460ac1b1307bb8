//! Application startup and lifecycle management.
//!
//! Explicit composition root: services are wired in dependency order
//! (clock and ids, outbox, audit, ledger, usage, rating, scheduler,
//! snapshot worker, payments) and the background workers share one
//! shutdown channel with the HTTP server.

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::{
    AuditService, Database, IdGenerator, InvoiceDriver, LedgerService, NullInvoiceDriver, Outbox,
    PaymentService, RatingService, ResolverCache, Scheduler, SchedulerConfig, SnapshotConfig,
    SnapshotWorker, SystemClock, UsageService, get_metrics, init_metrics,
    clock::Clock, payment::adapters::Registry,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

const RESOLVER_CACHE_TTL: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Database,
    pub outbox: Outbox,
    pub ledger: LedgerService,
    pub usage: UsageService,
    pub rating: RatingService,
    pub payments: PaymentService,
    pub scheduler: Scheduler,
    pub snapshot_worker: SnapshotWorker,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "billing-engine",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "billing-engine",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration, running
    /// migrations and wiring every service.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_with_driver(config, Arc::new(NullInvoiceDriver)).await
    }

    /// Build with a specific invoice driver. Tests and deployments with a
    /// real invoice generator plug in here.
    pub async fn build_with_driver(
        config: BillingConfig,
        invoices: Arc<dyn InvoiceDriver>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            AppError::DatabaseError(anyhow::anyhow!("{e}"))
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            AppError::DatabaseError(anyhow::anyhow!("{e}"))
        })?;

        let state = build_state(config.clone(), db, invoices)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("{e}")))?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing engine listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the HTTP server and background workers until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let snapshot_worker = self.state.snapshot_worker.clone();
        let snapshot_shutdown = shutdown_rx.clone();
        let snapshot_handle = tokio::spawn(async move {
            snapshot_worker.run_forever(snapshot_shutdown).await;
        });

        let scheduler = self.state.scheduler.clone();
        let scheduler_shutdown = shutdown_rx;
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run_forever(scheduler_shutdown).await;
        });

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .route("/v1/usage", post(handlers::usage::ingest_usage))
            .route(
                "/v1/webhooks/:provider",
                post(handlers::webhooks::ingest_webhook),
            )
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state);

        tracing::info!(
            service = "billing-engine",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router).await;

        shutdown_tx.send(true).ok();
        snapshot_handle.abort();
        scheduler_handle.abort();

        result.map_err(|e| std::io::Error::other(format!("HTTP server error: {e}")))
    }
}

/// Wire every service in dependency order. Shared by the application and
/// the integration test harness.
pub fn build_state(
    config: BillingConfig,
    db: Database,
    invoices: Arc<dyn InvoiceDriver>,
) -> anyhow::Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    build_state_with_clock(config, db, invoices, clock)
}

/// Wire every service with an explicit clock; scheduler and snapshot
/// tests drive this with a manual clock.
pub fn build_state_with_clock(
    config: BillingConfig,
    db: Database,
    invoices: Arc<dyn InvoiceDriver>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AppState> {
    let idgen = Arc::new(IdGenerator::new(config.idgen.node_id)?);
    let cache = Arc::new(ResolverCache::new(RESOLVER_CACHE_TTL));
    let adapters = Arc::new(Registry::with_builtin());

    let outbox = Outbox::new(db.clone(), Arc::clone(&idgen), Arc::clone(&clock));
    let audit = AuditService::new(db.clone(), Arc::clone(&idgen), Arc::clone(&clock));
    let ledger = LedgerService::new(
        db.clone(),
        Arc::clone(&idgen),
        Arc::clone(&clock),
        outbox.clone(),
    );
    let usage = UsageService::new(
        db.clone(),
        Arc::clone(&idgen),
        Arc::clone(&clock),
        cache,
        outbox.clone(),
    );
    let rating = RatingService::new(db.clone(), Arc::clone(&idgen), Arc::clone(&clock));
    let scheduler = Scheduler::new(
        db.clone(),
        Arc::clone(&clock),
        Arc::clone(&idgen),
        rating.clone(),
        ledger.clone(),
        outbox.clone(),
        invoices,
        SchedulerConfig {
            batch_size: config.scheduler.batch_size,
            tick_interval: config.scheduler.tick_interval(),
        },
    );
    let snapshot_worker = SnapshotWorker::new(
        db.clone(),
        Arc::clone(&clock),
        SnapshotConfig {
            batch_size: config.snapshot.batch_size,
            poll_interval: config.snapshot.poll_interval(),
        },
    );
    let payments = PaymentService::new(
        db.clone(),
        idgen,
        clock,
        ledger.clone(),
        audit,
        outbox.clone(),
        adapters,
        config.payments.config_secret.expose_secret(),
    );

    Ok(AppState {
        config,
        db,
        outbox,
        ledger,
        usage,
        rating,
        payments,
        scheduler,
        snapshot_worker,
    })
}
