//! Prometheus metrics for the billing lifecycle engine.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, histogram_opts, opts,
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Usage events ingested (per-org metering)
pub static USAGE_INGESTED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Snapshot enrichment lag (now - recorded_at) with a 24h SLA boundary
pub static SNAPSHOT_LAG_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Usage rows pending per status
pub static SNAPSHOT_BACKLOG: OnceLock<IntGaugeVec> = OnceLock::new();

/// Usage rows processed by the snapshot worker per resulting status
pub static SNAPSHOT_PROCESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing cycle state transitions
pub static CYCLE_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Ledger entries posted per source type
pub static LEDGER_ENTRIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook deliveries per provider and outcome
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Outbox inserts per event type
pub static OUTBOX_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    USAGE_INGESTED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_usage_ingested_total",
                "Total usage events ingested by org and meter"
            ),
            &["org_id", "meter_code"]
        )
        .expect("Failed to register USAGE_INGESTED_TOTAL")
    });

    SNAPSHOT_LAG_SECONDS.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_snapshot_lag_seconds",
                "Delay between recorded_at and snapshot enrichment",
                vec![1.0, 10.0, 60.0, 600.0, 3600.0, 21600.0, 86400.0, 172800.0]
            ),
            &["status"]
        )
        .expect("Failed to register SNAPSHOT_LAG_SECONDS")
    });

    SNAPSHOT_BACKLOG.get_or_init(|| {
        register_int_gauge_vec!(
            opts!(
                "billing_snapshot_backlog",
                "Usage events awaiting or finished enrichment, by status"
            ),
            &["status"]
        )
        .expect("Failed to register SNAPSHOT_BACKLOG")
    });

    SNAPSHOT_PROCESSED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_snapshot_processed_total",
                "Usage events processed by the snapshot worker, by resulting status"
            ),
            &["status"]
        )
        .expect("Failed to register SNAPSHOT_PROCESSED_TOTAL")
    });

    CYCLE_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_cycle_transitions_total",
                "Billing cycle state transitions by transition name"
            ),
            &["transition"]
        )
        .expect("Failed to register CYCLE_TRANSITIONS_TOTAL")
    });

    LEDGER_ENTRIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_ledger_entries_total",
                "Ledger entries posted by source type"
            ),
            &["source_type"]
        )
        .expect("Failed to register LEDGER_ENTRIES_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_webhook_events_total",
                "Provider webhook deliveries by provider and outcome"
            ),
            &["provider", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    OUTBOX_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_outbox_events_total",
                "Billing events inserted into the outbox by type"
            ),
            &["event_type"]
        )
        .expect("Failed to register OUTBOX_EVENTS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by code for alerting"),
            &["error_code", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record an ingested usage event.
pub fn record_usage_ingested(org_id: i64, meter_code: &str) {
    if let Some(counter) = USAGE_INGESTED_TOTAL.get() {
        counter
            .with_label_values(&[&org_id.to_string(), meter_code])
            .inc();
    }
}

/// Record snapshot enrichment lag for one usage event.
pub fn record_snapshot_lag(status: &str, lag_seconds: f64) {
    if let Some(histogram) = SNAPSHOT_LAG_SECONDS.get() {
        histogram
            .with_label_values(&[status])
            .observe(lag_seconds.max(0.0));
    }
}

/// Set the usage backlog gauge for one status.
pub fn set_snapshot_backlog(status: &str, count: i64) {
    if let Some(gauge) = SNAPSHOT_BACKLOG.get() {
        gauge.with_label_values(&[status]).set(count);
    }
}

/// Record a usage event processed by the snapshot worker.
pub fn record_snapshot_processed(status: &str) {
    if let Some(counter) = SNAPSHOT_PROCESSED_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a billing cycle transition.
pub fn record_cycle_transition(transition: &str) {
    if let Some(counter) = CYCLE_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[transition]).inc();
    }
}

/// Record a posted ledger entry.
pub fn record_ledger_entry(source_type: &str) {
    if let Some(counter) = LEDGER_ENTRIES_TOTAL.get() {
        counter.with_label_values(&[source_type]).inc();
    }
}

/// Record a webhook delivery outcome.
pub fn record_webhook_event(provider: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[provider, outcome]).inc();
    }
}

/// Record an outbox insert attempt.
pub fn record_outbox_event(event_type: &str) {
    if let Some(counter) = OUTBOX_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_code: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_code, operation]).inc();
    }
}
