//! Usage ingestion integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{IngestRequest, SubscriptionStatus};
use chrono::{Duration, TimeZone, Utc};

fn ingest_request(customer_id: i64, meter_code: &str, value: f64) -> IngestRequest {
    IngestRequest {
        customer_id: customer_id.to_string(),
        meter_code: meter_code.to_string(),
        value,
        recorded_at: None,
        idempotency_key: None,
        metadata: None,
    }
}

#[tokio::test]
async fn ingest_stores_an_accepted_row() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let record = app
        .state
        .usage
        .ingest(org, ingest_request(customer, "api_calls", 1.5))
        .await
        .unwrap();

    assert_eq!(record.org_id, org);
    assert_eq!(record.customer_id, customer);
    assert_eq!(record.meter_code, "api_calls");
    assert_eq!(record.value, 1.5);
    assert_eq!(record.status, "accepted");
    assert!(record.snapshot_at.is_none());
    assert_eq!(app.count_rows("usage_events").await, 1);

    // Publication lands in the outbox keyed by the usage event id.
    let outbox_count = app
        .count_rows_where(
            "billing_events",
            &format!("event_type = 'usage.ingested' AND dedupe_key = '{}'", record.id),
        )
        .await;
    assert_eq!(outbox_count, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn duplicate_idempotency_key_returns_the_same_row() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let mut request = ingest_request(customer, "api_calls", 2.0);
    request.idempotency_key = Some("k1".to_string());

    let first = app.state.usage.ingest(org, request.clone()).await.unwrap();
    let second = app.state.usage.ingest(org, request).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(app.count_rows("usage_events").await, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn idempotency_keys_are_scoped_per_org() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org_a = app.seed_org().await;
    let org_b = app.seed_org().await;
    let customer_a = app.seed_customer(org_a, "A").await;
    let customer_b = app.seed_customer(org_b, "B").await;

    let mut request_a = ingest_request(customer_a, "api_calls", 1.0);
    request_a.idempotency_key = Some("shared".to_string());
    let mut request_b = ingest_request(customer_b, "api_calls", 1.0);
    request_b.idempotency_key = Some("shared".to_string());

    let first = app.state.usage.ingest(org_a, request_a).await.unwrap();
    let second = app.state.usage.ingest(org_b, request_b).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(app.count_rows("usage_events").await, 2);

    app.cleanup().await;
}

#[tokio::test]
async fn missing_org_is_rejected() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let err = app
        .state
        .usage
        .ingest(0, ingest_request(1, "api_calls", 1.0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidOrganization));
    app.cleanup().await;
}

#[tokio::test]
async fn unknown_customer_is_rejected() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    let err = app
        .state
        .usage
        .ingest(org, ingest_request(999_999, "api_calls", 1.0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidCustomer));

    let err = app
        .state
        .usage
        .ingest(org, ingest_request(-1, "api_calls", 1.0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidCustomer));

    app.cleanup().await;
}

#[tokio::test]
async fn non_finite_values_are_rejected() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = app
            .state
            .usage
            .ingest(org, ingest_request(customer, "api_calls", value))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BillingError::InvalidValue));
    }
    assert_eq!(app.count_rows("usage_events").await, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn blank_meter_code_is_rejected() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let err = app
        .state
        .usage
        .ingest(org, ingest_request(customer, "   ", 1.0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidMeterCode));

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_meter_code_is_still_accepted() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let record = app
        .state
        .usage
        .ingest(org, ingest_request(customer, "ghost", 3.0))
        .await
        .unwrap();

    // Resolution failure never fails ingestion; the row waits for the
    // background worker.
    assert_eq!(record.status, "accepted");
    assert!(record.meter_id.is_none());
    assert!(record.subscription_id.is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn recorded_at_defaults_to_the_clock() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let now = common::default_test_instant();
    let record = app
        .state
        .usage
        .ingest(org, ingest_request(customer, "api_calls", 1.0))
        .await
        .unwrap();
    assert_eq!(record.recorded_at, now);

    let explicit = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let mut request = ingest_request(customer, "api_calls", 1.0);
    request.recorded_at = Some(explicit);
    let record = app.state.usage.ingest(org, request).await.unwrap();
    assert_eq!(record.recorded_at, explicit);

    app.cleanup().await;
}

#[tokio::test]
async fn write_time_snapshot_is_captured_when_resolvable() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let meter = app.seed_meter(org, "api_calls").await;
    let price = app.seed_price_with_amount(org, Some(meter), "USD", 100).await;
    let activated = common::default_test_instant() - Duration::days(10);
    let subscription = app
        .seed_subscription(org, customer, SubscriptionStatus::Active, activated)
        .await;
    let item = app
        .seed_subscription_item(org, subscription, price, Some(meter))
        .await;

    let record = app
        .state
        .usage
        .ingest(org, ingest_request(customer, "api_calls", 1.0))
        .await
        .unwrap();

    // Best-effort snapshot resolved everything at write time, but the row
    // still waits for the worker to flip its status.
    assert_eq!(record.meter_id, Some(meter));
    assert_eq!(record.subscription_id, Some(subscription));
    assert_eq!(record.subscription_item_id, Some(item));
    assert_eq!(record.status, "accepted");

    app.cleanup().await;
}
