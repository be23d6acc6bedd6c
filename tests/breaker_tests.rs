// Circuit breaker state machine tests
// Author: kelexine (https://github.com/kelexine)

use blobgate::breaker::{BreakerConfig, BreakerError, BreakerRegistry, CircuitBreaker, CircuitState};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
enum CallError {
    #[error("origin down")]
    Down,
    #[error("bad request")]
    BadRequest,
}

const RECOVERY: Duration = Duration::from_secs(30);

fn breaker(threshold: u32) -> CircuitBreaker {
    let config = BreakerConfig::new(threshold, RECOVERY).with_expected_failure(Arc::new(|err: &(dyn std::error::Error + 'static)| {
        matches!(err.downcast_ref::<CallError>(), Some(CallError::BadRequest))
    }));
    CircuitBreaker::new("primary", config)
}

async fn fail(b: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), BreakerError<CallError>> {
    b.execute(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(CallError::Down)
    })
    .await
}

async fn succeed(b: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), BreakerError<CallError>> {
    b.execute(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<(), CallError>(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_without_invoking_call() {
    let b = breaker(3);
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner(CallError::Down))));
    }
    assert_eq!(b.state(), CircuitState::Open);

    match succeed(&b, &calls).await {
        Err(BreakerError::Open { name, retry_after }) => {
            assert_eq!(name, "primary");
            assert_eq!(retry_after, RECOVERY);
        }
        other => panic!("expected fail-fast, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_hint_counts_down() {
    let b = breaker(1);
    let calls = AtomicUsize::new(0);
    let _ = fail(&b, &calls).await;

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(b.try_acquire(), Err(Duration::from_secs(10)));
    assert_eq!(b.snapshot().retry_after_ms, Some(10_000));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_single_failure_reopens() {
    let b = breaker(3);
    let calls = AtomicUsize::new(0);
    for _ in 0..3 {
        let _ = fail(&b, &calls).await;
    }

    tokio::time::advance(RECOVERY).await;
    assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner(_))));
    assert_eq!(b.state(), CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 4, "the probe itself was admitted");

    // Recovery window restarts from the failed probe.
    assert!(matches!(succeed(&b, &calls).await, Err(BreakerError::Open { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_three_probe_successes_close_with_zeroed_counters() {
    let b = breaker(2);
    let calls = AtomicUsize::new(0);
    let _ = fail(&b, &calls).await;
    let _ = fail(&b, &calls).await;

    tokio::time::advance(RECOVERY).await;
    succeed(&b, &calls).await.unwrap();
    assert_eq!(b.state(), CircuitState::HalfOpen);
    succeed(&b, &calls).await.unwrap();
    assert_eq!(b.state(), CircuitState::HalfOpen);
    succeed(&b, &calls).await.unwrap();

    assert_eq!(b.state(), CircuitState::Closed);
    assert_eq!(b.failure_count(), 0);
    assert_eq!(b.success_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expected_failures_never_change_state() {
    let b = breaker(1);
    for _ in 0..10 {
        let result = b.execute(|| async { Err::<(), _>(CallError::BadRequest) }).await;
        assert!(matches!(result, Err(BreakerError::Inner(CallError::BadRequest))));
    }
    assert_eq!(b.state(), CircuitState::Closed);
    assert_eq!(b.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_are_all_counted() {
    let registry = Arc::new(BreakerRegistry::new(BreakerConfig::new(1000, RECOVERY)));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                registry.get_or_create("origin").record_failure();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.get("origin").unwrap().failure_count(), 400);
}

#[test]
fn test_registry_hands_out_one_breaker_per_origin() {
    let registry = BreakerRegistry::new(BreakerConfig::default());
    let a = registry.get_or_create("primary");
    let b = registry.get_or_create("primary");
    let c = registry.get_or_create("mirror");
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));

    let names: Vec<_> = registry.snapshot().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["mirror", "primary"]);
}

proptest! {
    /// Without the clock moving, the breaker is open exactly when some run
    /// of consecutive failures reached the threshold.
    #[test]
    fn prop_opens_on_consecutive_failures(threshold in 1u32..6, outcomes in proptest::collection::vec(any::<bool>(), 0..40)) {
        let b = CircuitBreaker::new("origin", BreakerConfig::new(threshold, Duration::from_secs(3600)));

        let mut run = 0u32;
        let mut opened = false;
        for ok in &outcomes {
            if opened {
                break;
            }
            if *ok {
                b.record_success();
                run = 0;
            } else {
                b.record_failure();
                run += 1;
                opened = run >= threshold;
            }
        }

        let expected = if opened { CircuitState::Open } else { CircuitState::Closed };
        prop_assert_eq!(b.state(), expected);
        if !opened {
            prop_assert_eq!(b.failure_count(), run);
        }
    }
}
