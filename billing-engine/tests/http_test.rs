//! HTTP surface integration tests.

mod common;

use billing_engine::startup::Application;
use serde_json::{Value, json};

/// Spin up the full application against the harness schema and return its
/// base URL.
async fn spawn_http(app: &common::TestApp) -> String {
    let config = common::test_config(&app.database_url);
    let application = Application::build(config)
        .await
        .expect("Failed to build application");
    let port = application.port();

    tokio::spawn(async move {
        application.run_until_stopped().await.ok();
    });

    let base_url = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base_url}/health")).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    base_url
}

#[tokio::test]
async fn health_ready_and_metrics_respond() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let base_url = spawn_http(&app).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base_url}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "billing-engine");

    let ready = client.get(format!("{base_url}/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);

    let metrics = client.get(format!("{base_url}/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("billing_db_query_duration_seconds"));

    app.cleanup().await;
}

#[tokio::test]
async fn usage_endpoint_requires_an_org_and_ingests() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let customer = app.seed_customer(org, "Acme").await;
    let base_url = spawn_http(&app).await;
    let client = reqwest::Client::new();

    let request = json!({
        "customer_id": customer.to_string(),
        "meter_code": "api_calls",
        "value": 2.5,
        "idempotency_key": "http-k1"
    });

    // Missing org header is unauthorized.
    let response = client
        .post(format!("{base_url}/v1/usage"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(format!("{base_url}/v1/usage"))
        .header("X-Org-ID", org.to_string())
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meter_code"], "api_calls");
    assert_eq!(body["status"], "accepted");

    // Replays return the same stored row.
    let replay = client
        .post(format!("{base_url}/v1/usage"))
        .header("X-Org-ID", org.to_string())
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 202);
    let replay_body: Value = replay.json().await.unwrap();
    assert_eq!(replay_body["id"], body["id"]);

    // Validation errors map to 400.
    let bad = client
        .post(format!("{base_url}/v1/usage"))
        .header("X-Org-ID", org.to_string())
        .json(&json!({"customer_id": "nope", "meter_code": "api_calls", "value": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_endpoint_maps_pipeline_errors_to_statuses() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    app.seed_provider_config(
        org,
        "stripe",
        std::collections::HashMap::from([(
            "webhook_secret".to_string(),
            json!("whsec_http"),
        )]),
    )
    .await;
    let base_url = spawn_http(&app).await;
    let client = reqwest::Client::new();

    // Unsigned delivery of valid JSON: 401.
    let response = client
        .post(format!("{base_url}/v1/webhooks/stripe"))
        .body(json!({"id": "evt_http", "type": "charge.succeeded", "data": {"object": {}}}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Garbage body: 400.
    let response = client
        .post(format!("{base_url}/v1/webhooks/stripe"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown provider: 404.
    let response = client
        .post(format!("{base_url}/v1/webhooks/ghost"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}
