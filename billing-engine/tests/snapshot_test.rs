//! Snapshot worker integration tests.

mod common;

use billing_engine::models::{IngestRequest, SubscriptionStatus, UsageEvent};
use chrono::Duration;

async fn ingest(app: &common::TestApp, org: i64, customer: i64, meter_code: &str) -> i64 {
    app.state
        .usage
        .ingest(
            org,
            IngestRequest {
                customer_id: customer.to_string(),
                meter_code: meter_code.to_string(),
                value: 1.0,
                recorded_at: None,
                idempotency_key: None,
                metadata: None,
            },
        )
        .await
        .unwrap()
        .id
}

async fn load_usage_event(app: &common::TestApp, id: i64) -> UsageEvent {
    sqlx::query_as::<_, UsageEvent>(
        r#"
        SELECT id, org_id, customer_id, subscription_id, subscription_item_id,
               meter_id, meter_code, value, recorded_at, status, error,
               idempotency_key, metadata, snapshot_at, created_at, updated_at
        FROM usage_events
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_one(app.db.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn enriches_rows_with_full_snapshot() {
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

    let usage_id = ingest(&app, org, customer, "api_calls").await;
    let processed = app.state.snapshot_worker.process_batch(50).await.unwrap();
    assert_eq!(processed, 1);

    let row = load_usage_event(&app, usage_id).await;
    assert_eq!(row.status, "enriched");
    assert_eq!(row.subscription_id, Some(subscription));
    assert_eq!(row.subscription_item_id, Some(item));
    assert_eq!(row.meter_id, Some(meter));
    assert_eq!(row.snapshot_at, Some(common::default_test_instant()));

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_meter_marks_unmatched_meter() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    let usage_id = ingest(&app, org, customer, "ghost").await;
    app.state.snapshot_worker.process_batch(50).await.unwrap();

    let row = load_usage_event(&app, usage_id).await;
    assert_eq!(row.status, "unmatched_meter");
    assert!(row.subscription_id.is_none());
    assert!(row.meter_id.is_none());
    assert!(row.snapshot_at.is_some());

    app.cleanup().await;
}

#[tokio::test]
async fn missing_active_subscription_marks_unmatched_subscription() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    app.seed_meter(org, "api_calls").await;

    // The subscription activates only after the usage was recorded.
    let later = common::default_test_instant() + Duration::days(1);
    app.seed_subscription(org, customer, SubscriptionStatus::Active, later)
        .await;

    let usage_id = ingest(&app, org, customer, "api_calls").await;
    app.state.snapshot_worker.process_batch(50).await.unwrap();

    let row = load_usage_event(&app, usage_id).await;
    assert_eq!(row.status, "unmatched_subscription");

    app.cleanup().await;
}

#[tokio::test]
async fn matched_meter_without_item_stays_enriched() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let meter = app.seed_meter(org, "api_calls").await;
    let activated = common::default_test_instant() - Duration::days(10);
    let subscription = app
        .seed_subscription(org, customer, SubscriptionStatus::Active, activated)
        .await;

    let usage_id = ingest(&app, org, customer, "api_calls").await;
    app.state.snapshot_worker.process_batch(50).await.unwrap();

    // Kept but unbilled: the snapshot captures the meter only.
    let row = load_usage_event(&app, usage_id).await;
    assert_eq!(row.status, "enriched");
    assert_eq!(row.subscription_id, Some(subscription));
    assert_eq!(row.meter_id, Some(meter));
    assert!(row.subscription_item_id.is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn batch_limit_bounds_work_per_pass() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;

    for _ in 0..3 {
        ingest(&app, org, customer, "ghost").await;
    }

    assert_eq!(app.state.snapshot_worker.process_batch(2).await.unwrap(), 2);
    assert_eq!(
        app.count_rows_where("usage_events", "status = 'accepted'").await,
        1
    );
    assert_eq!(app.state.snapshot_worker.process_batch(2).await.unwrap(), 1);
    assert_eq!(
        app.count_rows_where("usage_events", "status = 'accepted'").await,
        0
    );

    app.cleanup().await;
}
