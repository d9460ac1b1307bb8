//! Rating integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{BillingCycleStatus, IngestRequest, RatingResult, SubscriptionStatus};
use chrono::{DateTime, TimeZone, Utc};

struct Fixture {
    org: i64,
    customer: i64,
    meter: i64,
    price: i64,
    subscription: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
}

async fn billing_fixture(app: &common::TestApp) -> Fixture {
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let meter = app.seed_meter(org, "api_calls").await;
    let price = app.seed_price_with_amount(org, Some(meter), "USD", 100).await;
    let subscription = app
        .seed_subscription(org, customer, SubscriptionStatus::Active, jan(1))
        .await;
    app.seed_subscription_item(org, subscription, price, Some(meter))
        .await;

    Fixture {
        org,
        customer,
        meter,
        price,
        subscription,
        period_start: jan(1),
        period_end: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
    }
}

async fn ingest_and_enrich(app: &common::TestApp, fixture: &Fixture, values: &[(f64, u32)]) {
    for (value, day) in values {
        app.state
            .usage
            .ingest(
                fixture.org,
                IngestRequest {
                    customer_id: fixture.customer.to_string(),
                    meter_code: "api_calls".to_string(),
                    value: *value,
                    recorded_at: Some(jan(*day)),
                    idempotency_key: None,
                    metadata: None,
                },
            )
            .await
            .unwrap();
    }
    app.state.snapshot_worker.process_batch(50).await.unwrap();
}

async fn rating_rows(app: &common::TestApp, cycle_id: i64) -> Vec<RatingResult> {
    sqlx::query_as::<_, RatingResult>(
        r#"
        SELECT id, org_id, subscription_id, billing_cycle_id, meter_id, price_id,
               quantity, unit_price, amount, currency, period_start, period_end,
               source, checksum, created_at
        FROM rating_results
        WHERE billing_cycle_id = $1
        ORDER BY id
        "#,
    )
    .bind(cycle_id)
    .fetch_all(app.db.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn rates_aggregated_usage_for_a_closing_cycle() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let fixture = billing_fixture(&app).await;
    ingest_and_enrich(&app, &fixture, &[(1.0, 3), (2.5, 10), (3.0, 20)]).await;

    let cycle = app
        .seed_billing_cycle(
            fixture.org,
            fixture.subscription,
            fixture.period_start,
            fixture.period_end,
            BillingCycleStatus::Closing,
        )
        .await;

    app.state.rating.run_rating(cycle).await.unwrap();

    let rows = rating_rows(&app, cycle).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.quantity, 6.5);
    assert_eq!(row.unit_price, 100);
    assert_eq!(row.amount, 650);
    assert_eq!(row.currency, "USD");
    assert_eq!(row.meter_id, fixture.meter);
    assert_eq!(row.price_id, fixture.price);
    assert_eq!(row.source, "usage_events");
    assert_eq!(row.checksum.len(), 64);

    // The contributing usage flips to rated.
    assert_eq!(
        app.count_rows_where("usage_events", "status = 'rated'").await,
        3
    );

    app.cleanup().await;
}

#[tokio::test]
async fn rerunning_rating_inserts_no_new_rows() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let fixture = billing_fixture(&app).await;
    ingest_and_enrich(&app, &fixture, &[(2.0, 5)]).await;

    let cycle = app
        .seed_billing_cycle(
            fixture.org,
            fixture.subscription,
            fixture.period_start,
            fixture.period_end,
            BillingCycleStatus::Closing,
        )
        .await;

    app.state.rating.run_rating(cycle).await.unwrap();
    let first = rating_rows(&app, cycle).await;
    app.state.rating.run_rating(cycle).await.unwrap();
    let second = rating_rows(&app, cycle).await;

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].id, second[0].id);

    app.cleanup().await;
}

#[tokio::test]
async fn usage_outside_the_period_does_not_rate() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let fixture = billing_fixture(&app).await;
    ingest_and_enrich(&app, &fixture, &[(1.0, 10)]).await;

    // Feb 1 falls outside [Jan 1, Feb 1).
    app.state
        .usage
        .ingest(
            fixture.org,
            IngestRequest {
                customer_id: fixture.customer.to_string(),
                meter_code: "api_calls".to_string(),
                value: 100.0,
                recorded_at: Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()),
                idempotency_key: None,
                metadata: None,
            },
        )
        .await
        .unwrap();
    app.state.snapshot_worker.process_batch(50).await.unwrap();

    let cycle = app
        .seed_billing_cycle(
            fixture.org,
            fixture.subscription,
            fixture.period_start,
            fixture.period_end,
            BillingCycleStatus::Closing,
        )
        .await;
    app.state.rating.run_rating(cycle).await.unwrap();

    let rows = rating_rows(&app, cycle).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, 1.0);
    assert_eq!(rows[0].amount, 100);

    app.cleanup().await;
}

#[tokio::test]
async fn missing_cycle_and_wrong_status_are_rejected() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let fixture = billing_fixture(&app).await;

    let err = app
        .state
        .rating
        .run_rating(123_456)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::BillingCycleNotFound));

    let open_cycle = app
        .seed_billing_cycle(
            fixture.org,
            fixture.subscription,
            fixture.period_start,
            fixture.period_end,
            BillingCycleStatus::Open,
        )
        .await;
    let err = app
        .state
        .rating
        .run_rating(open_cycle)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::BillingCycleNotClosing));

    app.cleanup().await;
}

#[tokio::test]
async fn item_without_meter_fails_rating() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let price = app.seed_price_with_amount(org, None, "USD", 100).await;
    let subscription = app
        .seed_subscription(org, customer, SubscriptionStatus::Active, jan(1))
        .await;
    app.seed_subscription_item(org, subscription, price, None).await;

    let cycle = app
        .seed_billing_cycle(
            org,
            subscription,
            jan(1),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            BillingCycleStatus::Closing,
        )
        .await;

    let err = app
        .state
        .rating
        .run_rating(cycle)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::MissingMeter));

    app.cleanup().await;
}

#[tokio::test]
async fn missing_price_amount_fails_rating() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let meter = app.seed_meter(org, "api_calls").await;
    let subscription = app
        .seed_subscription(org, customer, SubscriptionStatus::Active, jan(1))
        .await;

    // A price with no amounts at all.
    let price = app.next_id();
    sqlx::query("INSERT INTO prices (id, org_id, name) VALUES ($1, $2, 'bare')")
        .bind(price)
        .bind(org)
        .execute(app.db.pool())
        .await
        .unwrap();
    app.seed_subscription_item(org, subscription, price, Some(meter))
        .await;

    let cycle = app
        .seed_billing_cycle(
            org,
            subscription,
            jan(1),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            BillingCycleStatus::Closing,
        )
        .await;

    let err = app
        .state
        .rating
        .run_rating(cycle)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::MissingPriceAmount));

    app.cleanup().await;
}

#[tokio::test]
async fn meter_scoped_amount_wins_over_default() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let fixture = billing_fixture(&app).await;

    // Add a meter-null default amount under the same price; the
    // meter-scoped 100-cent amount must still win.
    sqlx::query(
        r#"
        INSERT INTO price_amounts (id, org_id, price_id, meter_id, currency, unit_amount_cents)
        VALUES ($1, $2, $3, NULL, 'USD', 999)
        "#,
    )
    .bind(app.next_id())
    .bind(fixture.org)
    .bind(fixture.price)
    .execute(app.db.pool())
    .await
    .unwrap();

    ingest_and_enrich(&app, &fixture, &[(1.0, 10)]).await;
    let cycle = app
        .seed_billing_cycle(
            fixture.org,
            fixture.subscription,
            fixture.period_start,
            fixture.period_end,
            BillingCycleStatus::Closing,
        )
        .await;
    app.state.rating.run_rating(cycle).await.unwrap();

    let rows = rating_rows(&app, cycle).await;
    assert_eq!(rows[0].unit_price, 100);

    app.cleanup().await;
}
