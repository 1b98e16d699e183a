//! Integration tests for the PostgreSQL stores
//!
//! Need `DATABASE_URL`; each test returns early without it.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;

use bnc_billing::billing::{BillingStore, PgBillingStore, StoreError, UserLedger};
use bnc_billing::bnc::{PgWorkingKeyRepository, WorkingKeyRecord, WorkingKeyRepository};
use bnc_billing::domain::{Amount, Nationality, NewPayment, PayerDetails};
use bnc_billing::handlers::{PaymentAllocator, RecordPaymentCommand};
use bnc_billing::AppError;

mod common;

fn month(m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, m, 1).unwrap()
}

fn payer() -> PayerDetails {
    PayerDetails::new(
        Nationality::V,
        "12345678",
        "0191",
        "04141234567",
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
    )
    .with_reference("556677")
}

fn command(user_id: i64, bs: Decimal) -> RecordPaymentCommand {
    RecordPaymentCommand::new(user_id, Amount::new(bs).unwrap(), payer())
}

async fn invoice_state(pool: &PgPool, id: i64) -> (Decimal, String) {
    sqlx::query_as("SELECT amount_paid, status FROM invoices WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn credit_balance(pool: &PgPool, user_id: i64) -> Decimal {
    sqlx::query_scalar("SELECT credit_balance FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn payment_rows(pool: &PgPool, user_id: i64) -> Vec<(Option<i64>, Decimal)> {
    sqlx::query_as("SELECT invoice_id, amount FROM payments WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

// =========================================================================
// Billing store
// =========================================================================

#[tokio::test]
async fn test_pg_allocation_settles_oldest_first() {
    let Some(pool) = common::setup_test_db().await else { return };
    let user_id = common::seed_user(&pool, Decimal::ZERO).await;
    let may = common::seed_invoice(&pool, user_id, month(5), dec!(100)).await;
    let june = common::seed_invoice(&pool, user_id, month(6), dec!(100)).await;

    let allocator = PaymentAllocator::new(Arc::new(PgBillingStore::new(pool.clone())));
    let result = allocator.allocate(command(user_id, dec!(6000)), Some(dec!(40))).await.unwrap();

    assert_eq!(result.amount_usd, dec!(150));
    assert_eq!(invoice_state(&pool, may).await, (dec!(100), "paid".to_string()));
    assert_eq!(invoice_state(&pool, june).await, (dec!(50), "partial".to_string()));
    assert_eq!(credit_balance(&pool, user_id).await, Decimal::ZERO);

    let rows = payment_rows(&pool, user_id).await;
    assert_eq!(
        rows,
        vec![(None, dec!(150)), (Some(may), dec!(100)), (Some(june), dec!(50))]
    );
}

#[tokio::test]
async fn test_pg_unknown_user() {
    let Some(pool) = common::setup_test_db().await else { return };
    let store = PgBillingStore::new(pool);
    assert!(matches!(store.begin(-1).await, Err(StoreError::UserNotFound(-1))));
}

#[tokio::test]
async fn test_pg_concurrent_allocations_are_serialized() {
    let Some(pool) = common::setup_test_db().await else { return };
    let user_id = common::seed_user(&pool, Decimal::ZERO).await;
    let first = common::seed_invoice(&pool, user_id, month(5), dec!(60)).await;
    let second = common::seed_invoice(&pool, user_id, month(6), dec!(60)).await;

    let allocator = PaymentAllocator::new(Arc::new(PgBillingStore::new(pool.clone())));

    // Ten payments of 10 USD each against 120 USD owed
    let mut handles = Vec::new();
    for _ in 0..10 {
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator.allocate(command(user_id, dec!(400)), Some(dec!(40))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(invoice_state(&pool, first).await, (dec!(60), "paid".to_string()));
    assert_eq!(invoice_state(&pool, second).await, (dec!(40), "partial".to_string()));
    assert_eq!(credit_balance(&pool, user_id).await, Decimal::ZERO);

    let rows = payment_rows(&pool, user_id).await;
    assert_eq!(rows.len(), 20);
    let applied: Decimal = rows.iter().filter(|(i, _)| i.is_some()).map(|(_, a)| *a).sum();
    assert_eq!(applied, dec!(100));
}

#[tokio::test]
async fn test_pg_dropped_ledger_rolls_back() {
    let Some(pool) = common::setup_test_db().await else { return };
    let user_id = common::seed_user(&pool, dec!(5)).await;
    let store = PgBillingStore::new(pool.clone());

    {
        let mut ledger = store.begin(user_id).await.unwrap();
        ledger
            .insert_payment(NewPayment::original(user_id, &payer(), dec!(20)))
            .await
            .unwrap();
        assert_eq!(ledger.add_credit(dec!(20)).await.unwrap(), dec!(25));
    }

    assert!(payment_rows(&pool, user_id).await.is_empty());
    assert_eq!(credit_balance(&pool, user_id).await, dec!(5));

    // The row lock went away with the transaction
    let ledger = store.begin(user_id).await.unwrap();
    assert_eq!(ledger.user().credit_balance, dec!(5));
}

#[tokio::test]
async fn test_pg_fractional_credit_is_stored_exactly() {
    let Some(pool) = common::setup_test_db().await else { return };
    let user_id = common::seed_user(&pool, Decimal::ZERO).await;
    common::seed_invoice(&pool, user_id, month(6), dec!(33.3333)).await;

    let allocator = PaymentAllocator::new(Arc::new(PgBillingStore::new(pool.clone())));
    let result = allocator.allocate(command(user_id, dec!(1600)), Some(dec!(40))).await.unwrap();

    assert_eq!(result.credit_delta, dec!(6.6667));
    assert_eq!(result.credit_balance, dec!(6.6667));
    assert_eq!(credit_balance(&pool, user_id).await, dec!(6.6667));
}

#[tokio::test]
async fn test_pg_amount_beyond_ledger_is_rejected_without_writes() {
    let Some(pool) = common::setup_test_db().await else { return };
    let user_id = common::seed_user(&pool, Decimal::ZERO).await;

    let allocator = PaymentAllocator::new(Arc::new(PgBillingStore::new(pool.clone())));
    let err = allocator
        .allocate(command(user_id, dec!(1000000000000)), Some(dec!(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Domain(_)));
    assert!(payment_rows(&pool, user_id).await.is_empty());
}

// =========================================================================
// Working keys
// =========================================================================

fn key_record(api_name: &str, key: &str, at: chrono::DateTime<Utc>) -> WorkingKeyRecord {
    WorkingKeyRecord {
        api_name: api_name.to_string(),
        working_key: key.to_string(),
        generated_at: at,
    }
}

#[tokio::test]
async fn test_pg_working_key_local_day_window() {
    let Some(pool) = common::setup_test_db().await else { return };
    let repo = PgWorkingKeyRepository::new(pool);
    let api_name = format!("bnc-{}", uuid::Uuid::new_v4());
    let caracas = FixedOffset::west_opt(4 * 3600).unwrap();

    // 23:30 on June 10th in Caracas
    let late = Utc.with_ymd_and_hms(2025, 6, 11, 3, 30, 0).unwrap();
    // 00:30 on June 11th in Caracas
    let early = Utc.with_ymd_and_hms(2025, 6, 11, 4, 30, 0).unwrap();
    repo.save(&key_record(&api_name, "key-june-10", late)).await.unwrap();
    repo.save(&key_record(&api_name, "key-june-11", early)).await.unwrap();

    let june_10 = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let june_11 = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();
    let june_12 = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();

    let found = repo.latest_for_date(&api_name, june_10, caracas).await.unwrap().unwrap();
    assert_eq!(found.working_key, "key-june-10");
    let found = repo.latest_for_date(&api_name, june_11, caracas).await.unwrap().unwrap();
    assert_eq!(found.working_key, "key-june-11");
    assert!(repo.latest_for_date(&api_name, june_12, caracas).await.unwrap().is_none());

    let latest = repo.latest(&api_name).await.unwrap().unwrap();
    assert_eq!(latest.working_key, "key-june-11");
    assert_eq!(latest.generated_at, early);
}

#[tokio::test]
async fn test_pg_working_key_newest_of_the_day_wins() {
    let Some(pool) = common::setup_test_db().await else { return };
    let repo = PgWorkingKeyRepository::new(pool);
    let api_name = format!("bnc-{}", uuid::Uuid::new_v4());
    let caracas = FixedOffset::west_opt(4 * 3600).unwrap();

    let morning = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
    let evening = Utc.with_ymd_and_hms(2025, 6, 10, 22, 0, 0).unwrap();
    repo.save(&key_record(&api_name, "evening", evening)).await.unwrap();
    repo.save(&key_record(&api_name, "morning", morning)).await.unwrap();

    let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let found = repo.latest_for_date(&api_name, date, caracas).await.unwrap().unwrap();
    assert_eq!(found.working_key, "evening");
}
