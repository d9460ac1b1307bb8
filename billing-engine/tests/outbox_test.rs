//! Outbox integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::Event;
use serde_json::json;

fn event(org_id: i64, event_type: &str, dedupe_key: &str) -> Event {
    Event {
        org_id,
        event_type: event_type.to_string(),
        payload: json!({"entity_id": "1", "org_id": org_id}),
        dedupe_key: dedupe_key.to_string(),
    }
}

#[tokio::test]
async fn publish_inserts_once_per_dedupe_key() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    app.state
        .outbox
        .publish(event(org, "payment_settled", "payment_settled:1"))
        .await
        .unwrap();
    app.state
        .outbox
        .publish(event(org, "payment_settled", "payment_settled:1"))
        .await
        .unwrap();

    assert_eq!(app.count_rows("billing_events").await, 1);
    let published: bool = sqlx::query_scalar("SELECT published FROM billing_events LIMIT 1")
        .fetch_one(app.db.pool())
        .await
        .unwrap();
    assert!(!published);

    app.cleanup().await;
}

#[tokio::test]
async fn same_dedupe_key_in_different_orgs_inserts_twice() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org_a = app.seed_org().await;
    let org_b = app.seed_org().await;

    app.state
        .outbox
        .publish(event(org_a, "invoice_finalized", "invoice_finalized:9"))
        .await
        .unwrap();
    app.state
        .outbox
        .publish(event(org_b, "invoice_finalized", "invoice_finalized:9"))
        .await
        .unwrap();

    assert_eq!(app.count_rows("billing_events").await, 2);

    app.cleanup().await;
}

#[tokio::test]
async fn publish_tx_commits_with_the_transaction() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    // Rolled back: the event vanishes with the transaction.
    let mut tx = app.db.pool().begin().await.unwrap();
    app.state
        .outbox
        .publish_tx(&mut tx, event(org, "refund_settled", "refund_settled:1"))
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(app.count_rows("billing_events").await, 0);

    // Committed: the event lands exactly once.
    let mut tx = app.db.pool().begin().await.unwrap();
    app.state
        .outbox
        .publish_tx(&mut tx, event(org, "refund_settled", "refund_settled:1"))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(app.count_rows("billing_events").await, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn rejects_invalid_events() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    let err = app
        .state
        .outbox
        .publish(event(0, "payment_settled", "k"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidOrganization));

    let err = app
        .state
        .outbox
        .publish(event(org, "   ", "k"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidEvent));

    app.cleanup().await;
}

#[tokio::test]
async fn blank_dedupe_keys_do_not_collapse() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    app.state
        .outbox
        .publish(event(org, "dispute_withdrawn", ""))
        .await
        .unwrap();
    app.state
        .outbox
        .publish(event(org, "dispute_withdrawn", ""))
        .await
        .unwrap();

    assert_eq!(app.count_rows("billing_events").await, 2);

    app.cleanup().await;
}
