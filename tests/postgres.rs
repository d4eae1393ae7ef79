//! PostgreSQL 账本集成测试; 未设置 DATABASE_URL 时跳过
use chrono::{TimeZone, Utc};
use expiry_scan::config::DatabaseConfig;
use expiry_scan::db::PgLineStore;
use expiry_scan::{create_pool, ensure_schema, AppError, LedgerService};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

static SCHEMA: OnceLock<Mutex<()>> = OnceLock::new();

async fn pg_ledger() -> Option<LedgerService> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return None;
    };
    let pool = create_pool(&DatabaseConfig {
        url,
        max_connections: 5,
        acquire_timeout_secs: 5,
    })
    .await
    .unwrap();

    {
        // CREATE TABLE IF NOT EXISTS 并发执行会冲突
        let _guard = SCHEMA.get_or_init(|| Mutex::new(())).lock().await;
        ensure_schema(&pool).await.unwrap();
    }
    Some(LedgerService::new(Arc::new(PgLineStore::new(pool))))
}

fn barcode(tag: &str) -> String {
    format!("pg-{}-{}", tag, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
async fn test_pg_confirm_merges_and_missing_date_is_one_lot() {
    let Some(ledger) = pg_ledger().await else { return };
    let code = barcode("merge");

    ledger.upsert_confirmed_scan(&code, "09/2027", 2, None).await.unwrap();
    let line = ledger.upsert_confirmed_scan(&code, "01.09.2027", 3, None).await.unwrap();
    assert_eq!(line.quantity, 5);

    ledger.create_line(&code, None, 1, None).await.unwrap();
    let undated = ledger.create_line(&code, None, 4, None).await.unwrap();
    assert_eq!(undated.quantity, 5);
    assert!(undated.expiration_date.is_none());

    ledger.upsert_confirmed_scan(&code, "06/2027", 1, None).await.unwrap();
    let lines = ledger.list_by_barcode(&code).await.unwrap();
    let dates: Vec<_> = lines.iter().map(|l| l.expiration_date).collect();
    assert_eq!(
        dates,
        vec![
            Some(Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2027, 9, 1, 0, 0, 0).unwrap()),
            None,
        ]
    );

    assert_eq!(ledger.delete_line(&code, None).await.unwrap(), 3);
}

#[tokio::test]
async fn test_pg_decrement_floors_at_zero_on_earliest_lot() {
    let Some(ledger) = pg_ledger().await else { return };
    let code = barcode("floor");

    ledger.create_line(&code, None, 9, None).await.unwrap();
    ledger.upsert_confirmed_scan(&code, "10/2027", 3, None).await.unwrap();
    ledger.upsert_confirmed_scan(&code, "09/2027", 3, None).await.unwrap();

    let line = ledger.decrement_quantity(&code, 100, None).await.unwrap();
    assert_eq!(line.quantity, 0);
    assert_eq!(line.expiration_date, Some(Utc.with_ymd_and_hms(2027, 9, 1, 0, 0, 0).unwrap()));

    let line = ledger.increment_quantity(&code, 2, Some("10/2027")).await.unwrap();
    assert_eq!(line.quantity, 5);

    assert!(matches!(
        ledger.increment_quantity(&code, 1, Some("12/2030")).await,
        Err(AppError::NotFound(_))
    ));

    ledger.delete_line(&code, None).await.unwrap();
}

#[tokio::test]
async fn test_pg_update_expiration_moves_then_merges() {
    let Some(ledger) = pg_ledger().await else { return };
    let code = barcode("expiry");

    let lot = ledger.upsert_confirmed_scan(&code, "09/2027", 3, None).await.unwrap();
    let moved = ledger.update_expiration_date(&code, "09/2027", "11/2027").await.unwrap();
    assert_eq!(moved.id, lot.id);
    assert_eq!(moved.quantity, 3);

    let target = ledger.upsert_confirmed_scan(&code, "12/2027", 4, None).await.unwrap();
    let merged = ledger.update_expiration_date(&code, "11/2027", "12/2027").await.unwrap();
    assert_eq!(merged.id, target.id);
    assert_eq!(merged.quantity, 7);
    assert_eq!(ledger.list_by_barcode(&code).await.unwrap().len(), 1);

    ledger.delete_line(&code, None).await.unwrap();
}

#[tokio::test]
async fn test_pg_overflow_is_invalid_argument() {
    let Some(ledger) = pg_ledger().await else { return };
    let code = barcode("overflow");

    ledger.upsert_confirmed_scan(&code, "09/2027", i64::MAX, None).await.unwrap();
    ledger.upsert_confirmed_scan(&code, "10/2027", 1, None).await.unwrap();

    assert!(matches!(
        ledger.upsert_confirmed_scan(&code, "09/2027", 1, None).await,
        Err(AppError::InvalidArgument(_))
    ));
    assert!(matches!(
        ledger.increment_quantity(&code, 1, Some("09/2027")).await,
        Err(AppError::InvalidArgument(_))
    ));
    assert!(matches!(
        ledger.update_expiration_date(&code, "10/2027", "09/2027").await,
        Err(AppError::InvalidArgument(_))
    ));

    let lines = ledger.list_by_barcode(&code).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].quantity, i64::MAX);
    assert_eq!(lines[1].quantity, 1);

    ledger.delete_line(&code, None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_confirmations_do_not_lose_updates() {
    let Some(ledger) = pg_ledger().await else { return };
    let ledger = Arc::new(ledger);
    let code = barcode("concurrent");

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let ledger = ledger.clone();
            let code = code.clone();
            tokio::spawn(async move {
                ledger.upsert_confirmed_scan(&code, "09/2027", 1, None).await.unwrap();
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let lines = ledger.list_by_barcode(&code).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 20);

    ledger.delete_line(&code, None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_expiration_move_races_with_confirmations_of_target_lot() {
    let Some(ledger) = pg_ledger().await else { return };
    let ledger = Arc::new(ledger);
    let code = barcode("race");

    ledger.upsert_confirmed_scan(&code, "09/2027", 5, None).await.unwrap();

    let mover = {
        let ledger = ledger.clone();
        let code = code.clone();
        tokio::spawn(async move {
            ledger.update_expiration_date(&code, "09/2027", "10/2027").await
        })
    };
    let confirms: Vec<_> = (0..10)
        .map(|_| {
            let ledger = ledger.clone();
            let code = code.clone();
            tokio::spawn(async move {
                ledger.upsert_confirmed_scan(&code, "10/2027", 1, None).await.unwrap();
            })
        })
        .collect();

    mover.await.unwrap().unwrap();
    for result in futures::future::join_all(confirms).await {
        result.unwrap();
    }

    let lines = ledger.list_by_barcode(&code).await.unwrap();
    assert_eq!(lines.len(), 1);
    let october = Utc.with_ymd_and_hms(2027, 10, 1, 0, 0, 0).unwrap();
    assert_eq!(lines[0].expiration_date, Some(october));
    assert_eq!(lines[0].quantity, 15);

    ledger.delete_line(&code, None).await.unwrap();
}
