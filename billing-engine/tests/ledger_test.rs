//! Ledger integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{EntryLine, ledger::Direction};
use chrono::{TimeZone, Utc};

fn lines(debit_account: i64, credit_account: i64, amount: i64) -> [EntryLine; 2] {
    [
        EntryLine {
            account_id: debit_account,
            direction: Direction::Debit,
            amount,
        },
        EntryLine {
            account_id: credit_account,
            direction: Direction::Credit,
            amount,
        },
    ]
}

#[tokio::test]
async fn posts_a_balanced_entry_with_lines() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let ar = app.state.ledger.ensure_account(org, "accounts_receivable", "Accounts Receivable").await.unwrap();
    let revenue = app.state.ledger.ensure_account(org, "revenue", "Revenue").await.unwrap();

    let occurred_at = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    let entry_id = app
        .state
        .ledger
        .create_entry(org, "billing_cycle", 7, "usd", occurred_at, &lines(ar, revenue, 650))
        .await
        .unwrap();

    let entry = app.state.ledger.find_entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.org_id, org);
    assert_eq!(entry.source_type, "billing_cycle");
    assert_eq!(entry.source_id, 7);
    assert_eq!(entry.currency, "USD");
    assert_eq!(entry.occurred_at, occurred_at);

    let entry_lines = app.state.ledger.entry_lines(entry_id).await.unwrap();
    assert_eq!(entry_lines.len(), 2);
    let debit: i64 = entry_lines.iter().filter(|l| l.direction == "debit").map(|l| l.amount).sum();
    let credit: i64 = entry_lines.iter().filter(|l| l.direction == "credit").map(|l| l.amount).sum();
    assert_eq!(debit, credit);
    assert!(entry_lines.iter().all(|l| l.amount >= 0));

    // Publication committed atomically with the entry.
    assert_eq!(
        app.count_rows_where(
            "billing_events",
            &format!("event_type = 'ledger_entry_created' AND dedupe_key = 'ledger_entry:{entry_id}'"),
        )
        .await,
        1
    );

    app.cleanup().await;
}

#[tokio::test]
async fn rejects_invalid_line_sets() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let ar = app.state.ledger.ensure_account(org, "accounts_receivable", "AR").await.unwrap();
    let revenue = app.state.ledger.ensure_account(org, "revenue", "Revenue").await.unwrap();
    let occurred_at = Utc::now();

    let single = [EntryLine {
        account_id: ar,
        direction: Direction::Debit,
        amount: 100,
    }];
    let err = app
        .state
        .ledger
        .create_entry(org, "adjustment", 1, "USD", occurred_at, &single)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidEntryLines));

    let negative = [
        EntryLine {
            account_id: ar,
            direction: Direction::Debit,
            amount: -1,
        },
        EntryLine {
            account_id: revenue,
            direction: Direction::Credit,
            amount: -1,
        },
    ];
    let err = app
        .state
        .ledger
        .create_entry(org, "adjustment", 1, "USD", occurred_at, &negative)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidLineAmount));

    let unbalanced = [
        EntryLine {
            account_id: ar,
            direction: Direction::Debit,
            amount: 100,
        },
        EntryLine {
            account_id: revenue,
            direction: Direction::Credit,
            amount: 99,
        },
    ];
    let err = app
        .state
        .ledger
        .create_entry(org, "adjustment", 1, "USD", occurred_at, &unbalanced)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::UnbalancedEntry));

    // Nothing partial was written.
    assert_eq!(app.count_rows("ledger_entries").await, 0);
    assert_eq!(app.count_rows("ledger_entry_lines").await, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn rejects_invalid_header_fields() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;
    let ar = app.state.ledger.ensure_account(org, "accounts_receivable", "AR").await.unwrap();
    let revenue = app.state.ledger.ensure_account(org, "revenue", "Revenue").await.unwrap();
    let occurred_at = Utc::now();
    let balanced = lines(ar, revenue, 100);

    let err = app
        .state
        .ledger
        .create_entry(0, "adjustment", 1, "USD", occurred_at, &balanced)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidOrganization));

    let err = app
        .state
        .ledger
        .create_entry(org, "  ", 1, "USD", occurred_at, &balanced)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidSource));

    let err = app
        .state
        .ledger
        .create_entry(org, "adjustment", 1, " ", occurred_at, &balanced)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidCurrency));

    app.cleanup().await;
}

#[tokio::test]
async fn ensure_account_converges_for_repeat_callers() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org = app.seed_org().await;

    let first = app
        .state
        .ledger
        .ensure_account(org, "cash_clearing", "Cash / Clearing")
        .await
        .unwrap();
    let second = app
        .state
        .ledger
        .ensure_account(org, "cash_clearing", "Cash / Clearing")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        app.count_rows_where("ledger_accounts", "code = 'cash_clearing'").await,
        1
    );

    // Concurrent creators also converge on one row.
    let ledger_a = app.state.ledger.clone();
    let ledger_b = app.state.ledger.clone();
    let (a, b) = tokio::join!(
        ledger_a.ensure_account(org, "tax_payable", "Tax Payable"),
        ledger_b.ensure_account(org, "tax_payable", "Tax Payable")
    );
    assert_eq!(a.unwrap(), b.unwrap());

    let err = app
        .state
        .ledger
        .ensure_account(org, "", "Nameless")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BillingError::InvalidAccount));

    app.cleanup().await;
}

#[tokio::test]
async fn account_codes_are_scoped_per_org() {
    let Some(app) = common::TestApp::spawn().await else { return };
    let org_a = app.seed_org().await;
    let org_b = app.seed_org().await;

    let a = app.state.ledger.ensure_account(org_a, "revenue", "Revenue").await.unwrap();
    let b = app.state.ledger.ensure_account(org_b, "revenue", "Revenue").await.unwrap();
    assert_ne!(a, b);

    app.cleanup().await;
}
