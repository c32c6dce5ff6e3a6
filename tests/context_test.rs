//! End-to-end flows through an owned resilience context

mod common;

use common::FlakyLedger;
use resilience_core::clock::ManualClock;
use resilience_core::config::ResilienceConfig;
use resilience_core::context::ResilienceContext;
use resilience_core::idempotency::{RunOnce, StoreMode};
use resilience_core::resilience::CircuitState;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_webhook_handler_flow() {
    let context = ResilienceContext::in_memory(ResilienceConfig::for_testing()).unwrap();
    let breaker = context.circuit_breakers().get_circuit_breaker("payment_processor");
    let retry = context.retry_executor::<String>();
    let charges = AtomicU32::new(0);

    for _ in 0..3 {
        let outcome = context
            .idempotency()
            .run_once("evt_webhook_1", "payment.succeeded", || async {
                retry
                    .run_guarded(&breaker, || async {
                        charges.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>("fulfilled")
                    })
                    .await
                    .map_err(|err| err.to_string())
            })
            .await
            .unwrap();

        if !outcome.was_executed() {
            assert!(matches!(outcome, RunOnce::Duplicate { .. }));
        }
    }

    assert_eq!(charges.load(Ordering::SeqCst), 1);
    context.shutdown().await;
}

#[tokio::test]
async fn test_health_reports_degraded_idempotency() {
    let ledger = FlakyLedger::new();
    let clock = ManualClock::new();
    let context = ResilienceContext::with_components(
        ResilienceConfig::for_testing(),
        Arc::new(ledger.clone()),
        Arc::new(clock.clone()),
    )
    .unwrap();

    ledger.set_failing(true);
    context
        .idempotency()
        .check_and_reserve("evt_1", "shipment.created")
        .await
        .unwrap();

    let report = context.health().await;
    assert!(!report.healthy);
    assert!(!report.idempotency_ledger_reachable);
    assert_eq!(report.idempotency.mode, StoreMode::Degraded);

    ledger.set_failing(false);
    context.idempotency().is_processed("evt_1").await.unwrap();
    assert!(context.health().await.healthy);
}

#[tokio::test]
async fn test_breakers_from_context_use_its_clock() {
    let clock = ManualClock::new();
    let context = ResilienceContext::with_components(
        ResilienceConfig::for_testing(),
        Arc::new(FlakyLedger::new()),
        Arc::new(clock.clone()),
    )
    .unwrap();

    let breaker = context.circuit_breakers().get_circuit_breaker("geocoder");
    for _ in 0..2 {
        let _ = breaker
            .call(|| async { Err::<(), _>("geocoder 503".to_string()) })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_millis(100));
    breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    let report = context.health().await;
    assert!(report.circuit_breakers.circuit_breakers.contains_key("geocoder"));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["idempotency"]["mode"], "normal");
}
