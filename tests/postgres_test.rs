//! Postgres-backed ledger and cache tier.
//!
//! Each test gets a fresh database with the embedded migrations applied:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use resilience_core::cache::{CacheService, PgCacheService};
use resilience_core::config::IdempotencyConfig;
use resilience_core::database;
use resilience_core::idempotency::{
    IdempotencyLedger, IdempotencyStore, PgIdempotencyLedger, Reservation, ReserveOutcome,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

#[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_schema_bootstrap_is_idempotent(pool: PgPool) -> sqlx::Result<()> {
    database::run_migrations(&pool).await?;
    PgIdempotencyLedger::new(pool.clone())
        .ensure_schema()
        .await
        .unwrap();
    PgCacheService::new(pool.clone()).ensure_schema().await.unwrap();

    assert!(database::check_connection(&pool).await?);

    let url = std::env::var("DATABASE_URL").unwrap();
    let standalone = database::connect(&url, 1).await?;
    assert!(database::check_connection(&standalone).await?);
    Ok(())
}

#[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_reservation_conflict_reads_existing_row(pool: PgPool) {
    let ledger = PgIdempotencyLedger::new(pool);

    assert_eq!(
        ledger
            .reserve("evt_pg_reserve", "payment.succeeded", Duration::from_secs(300))
            .await
            .unwrap(),
        ReserveOutcome::Reserved
    );

    let second = ledger
        .reserve("evt_pg_reserve", "payment.succeeded", Duration::from_secs(300))
        .await
        .unwrap();
    assert!(matches!(second, ReserveOutcome::Existing(ref record) if !record.processed));

    assert!(ledger.release("evt_pg_reserve").await.unwrap());
}

#[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_stale_reservation_is_taken_over(pool: PgPool) {
    let ledger = PgIdempotencyLedger::new(pool);

    ledger
        .reserve("evt_pg_crashed", "refund.created", Duration::from_secs(300))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        ledger
            .reserve("evt_pg_crashed", "refund.created", Duration::from_millis(1))
            .await
            .unwrap(),
        ReserveOutcome::Reserved
    );
}

#[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_reservations_have_one_winner(pool: PgPool) {
    let ledger = Arc::new(PgIdempotencyLedger::new(pool));
    let store = Arc::new(IdempotencyStore::new(ledger, IdempotencyConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .check_and_reserve("evt_pg_race", "payment.succeeded")
                .await
                .unwrap()
        }));
    }

    let mut acquired = 0;
    for handle in handles {
        if handle.await.unwrap() == Reservation::Acquired {
            acquired += 1;
        }
    }
    assert_eq!(acquired, 1);

    store
        .commit("evt_pg_race", "payment.succeeded", Some(json!({"order": 1})))
        .await
        .unwrap();
    store
        .commit("evt_pg_race", "payment.succeeded", Some(json!({"order": 2})))
        .await
        .unwrap();

    let state = store.is_processed("evt_pg_race").await.unwrap();
    assert!(state.processed);
    assert_eq!(state.result, Some(json!({"order": 1})));
}

#[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_cache_rows_expire(pool: PgPool) {
    let cache = PgCacheService::new(pool);

    cache
        .set("geocode:10001", "40.75,-73.99", Duration::from_secs(60))
        .await
        .unwrap();
    let hit = cache.get("geocode:10001").await.unwrap().unwrap();
    assert_eq!(hit.value, "40.75,-73.99");
    assert!(hit.ttl_remaining.unwrap() <= Duration::from_secs(60));

    cache
        .set("geocode:10001", "stale", Duration::from_millis(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.get("geocode:10001").await.unwrap().is_none());
    assert_eq!(cache.purge_expired().await.unwrap(), 1);

    assert!(cache.health_check().await.unwrap());
}
