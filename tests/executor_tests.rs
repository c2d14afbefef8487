//! Fault-tolerance properties of the retry/circuit-breaker executor:
//! breaker lifecycle through the execute path, backoff arithmetic, and
//! deterministic jitter.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conveyor::executor::{
    BackoffStrategy, CircuitBreakerConfig, CircuitState, ExecutionError, OperationFailure,
    RetryExecutor, RetryPolicy,
};

fn one_shot_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        strategy: BackoffStrategy::NoRetry,
        ..RetryPolicy::default()
    }
}

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        recovery_timeout: Duration::from_millis(200),
        half_open_max_probes: 1,
    }
}

async fn fail_once(executor: &RetryExecutor, class: &str, calls: &Arc<AtomicU32>) {
    let counted = Arc::clone(calls);
    let _: Result<(), _> = executor
        .execute(class, move || {
            let calls = Arc::clone(&counted);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OperationFailure::retryable("collaborator down"))
            }
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn fourth_dispatch_is_short_circuited_without_touching_the_collaborator() {
    let executor = RetryExecutor::new(one_shot_policy(), breaker_config());
    let calls = Arc::new(AtomicU32::new(0));

    // Three consecutive failures open the circuit...
    for _ in 0..3 {
        fail_once(&executor, "notification-dispatch", &calls).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        executor.breaker("notification-dispatch").state(),
        CircuitState::Open
    );

    // ...so the fourth attempt fails fast, collaborator never invoked.
    let counted = Arc::clone(&calls);
    let result: Result<(), _> = executor
        .execute("notification-dispatch", move || {
            let calls = Arc::clone(&counted);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OperationFailure::retryable("collaborator down"))
            }
        })
        .await;
    assert!(matches!(result, Err(ExecutionError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn recovery_timeout_admits_one_probe_then_closes_on_success_threshold() {
    let executor = RetryExecutor::new(one_shot_policy(), breaker_config());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        fail_once(&executor, "persistence-write", &calls).await;
    }
    assert_eq!(
        executor.breaker("persistence-write").state(),
        CircuitState::Open
    );

    tokio::time::advance(Duration::from_millis(250)).await;

    // One trial call goes through in half-open.
    let result = executor
        .execute("persistence-write", || async { Ok("recovered") })
        .await;
    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(
        executor.breaker("persistence-write").state(),
        CircuitState::HalfOpen
    );

    // Second consecutive success fully closes it.
    let result = executor
        .execute("persistence-write", || async { Ok("recovered") })
        .await;
    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(
        executor.breaker("persistence-write").state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_and_keeps_rejecting() {
    let executor = RetryExecutor::new(one_shot_policy(), breaker_config());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        fail_once(&executor, "audit-write", &calls).await;
    }
    tokio::time::advance(Duration::from_millis(250)).await;

    // The probe itself fails: straight back to open.
    fail_once(&executor, "audit-write", &calls).await;
    assert_eq!(executor.breaker("audit-write").state(), CircuitState::Open);

    let result: Result<(), _> = executor
        .execute("audit-write", || async {
            Err(OperationFailure::retryable("still down"))
        })
        .await;
    assert!(matches!(result, Err(ExecutionError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn administrative_reset_closes_an_open_circuit() {
    let executor = RetryExecutor::new(one_shot_policy(), breaker_config());
    let calls = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        fail_once(&executor, "notification-dispatch", &calls).await;
    }
    assert_eq!(
        executor.breaker("notification-dispatch").state(),
        CircuitState::Open
    );

    executor.reset("notification-dispatch");
    let result = executor
        .execute("notification-dispatch", || async { Ok(()) })
        .await;
    assert!(result.is_ok());
}

proptest! {
    /// delay(k) == min(base * mult^(k-1), max_delay) for the exponential
    /// strategy, and the sequence is monotonically non-decreasing.
    #[test]
    fn exponential_backoff_matches_formula(
        base_ms in 1u64..2_000,
        mult in 1.0f64..4.0,
        max_ms in 1_000u64..120_000,
        retry in 1u32..12,
    ) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: mult,
            strategy: BackoffStrategy::Exponential,
            ..RetryPolicy::default()
        };

        let expected = Duration::from_millis(base_ms)
            .mul_f64(mult.powi(retry as i32 - 1))
            .min(Duration::from_millis(max_ms));
        prop_assert_eq!(policy.delay_for_retry(retry), expected);

        if retry > 1 {
            prop_assert!(policy.delay_for_retry(retry) >= policy.delay_for_retry(retry - 1));
        }
    }

    /// With a fixed seed, jittered delays are reproducible run to run.
    #[test]
    fn seeded_jitter_is_reproducible(seed in any::<u64>(), retries in 1usize..8) {
        let policy = RetryPolicy {
            jitter: true,
            jitter_seed: Some(seed),
            ..RetryPolicy::default()
        };
        let mut first_rng = policy.jitter_rng().unwrap();
        let mut second_rng = policy.jitter_rng().unwrap();
        for retry in 1..=retries as u32 {
            prop_assert_eq!(
                policy.jittered_delay(retry, Some(&mut first_rng)),
                policy.jittered_delay(retry, Some(&mut second_rng))
            );
        }
    }
}
