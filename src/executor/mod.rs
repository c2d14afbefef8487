// Fault-tolerant execution: retry with backoff plus a per-class circuit
// breaker around any side-effecting operation.

pub mod circuit_breaker;
pub mod retry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use retry::{AttemptRecord, BackoffStrategy, FailureKind, OperationFailure, RetryPolicy};

use crate::observability::core_metrics;

/// Operation classes the core routes through the executor. Callers may use
/// any class name; these are the ones the orchestration service wires up.
pub const CLASS_PERSISTENCE_WRITE: &str = "persistence-write";
pub const CLASS_NOTIFICATION_DISPATCH: &str = "notification-dispatch";
pub const CLASS_AUDIT_WRITE: &str = "audit-write";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{class}: circuit open, operation not attempted")]
    CircuitOpen { class: String },

    #[error("{class}: fatal error after {n} attempt(s)", n = .attempts.len())]
    Fatal {
        class: String,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{class}: retries exhausted after {n} attempts", n = .attempts.len())]
    AttemptsExhausted {
        class: String,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{class}: deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        class: String,
        deadline: Duration,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{class}: cancelled before attempt {next_attempt}")]
    Cancelled {
        class: String,
        next_attempt: u32,
        attempts: Vec<AttemptRecord>,
    },
}

impl ExecutionError {
    /// Attempt history for audit/debugging; empty for fast-fail variants.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            ExecutionError::CircuitOpen { .. } => &[],
            ExecutionError::Fatal { attempts, .. }
            | ExecutionError::AttemptsExhausted { attempts, .. }
            | ExecutionError::DeadlineExceeded { attempts, .. }
            | ExecutionError::Cancelled { attempts, .. } => attempts,
        }
    }
}

/// Cooperative cancellation for an in-flight execution. Cancelling never
/// interrupts a started attempt; it only prevents new attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Retry/circuit-breaker executor. Holds per-class policies and breakers;
/// knows nothing about the operations it runs and never inspects their
/// results.
#[derive(Debug)]
pub struct RetryExecutor {
    default_policy: RetryPolicy,
    policies: HashMap<String, RetryPolicy>,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CircuitBreakerConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(default_policy: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            default_policy,
            policies: HashMap::new(),
            breaker_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Override the policy for one operation class.
    pub fn with_policy(mut self, class: impl Into<String>, policy: RetryPolicy) -> Self {
        self.policies.insert(class.into(), policy);
        self
    }

    pub fn policy(&self, class: &str) -> &RetryPolicy {
        self.policies.get(class).unwrap_or(&self.default_policy)
    }

    /// Breaker for a class, created on first use.
    pub fn breaker(&self, class: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(class) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().unwrap();
        Arc::clone(
            breakers
                .entry(class.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(class, self.breaker_config.clone()))
                }),
        )
    }

    /// Administrative: close the breaker for a class.
    pub fn reset(&self, class: &str) {
        if let Some(breaker) = self.breakers.read().unwrap().get(class) {
            breaker.reset();
        }
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers
            .read()
            .unwrap()
            .values()
            .map(|b| b.snapshot())
            .collect()
    }

    /// Run `operation` under the class's retry policy and breaker.
    pub async fn execute<T, F, Fut>(&self, class: &str, operation: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationFailure>>,
    {
        self.execute_cancellable(class, operation, None).await
    }

    /// Like [`execute`](Self::execute), but checks `cancel` before every
    /// attempt. An attempt that already started always runs to completion.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        class: &str,
        mut operation: F,
        cancel: Option<&CancelToken>,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationFailure>>,
    {
        let policy = self.policy(class).clone();
        let breaker = self.breaker(class);
        let started = Instant::now();
        let max_attempts = policy.effective_attempts();
        let mut rng = policy.jitter_rng();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for attempt in 1..=max_attempts {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    debug!(class, attempt, "execution cancelled");
                    return Err(ExecutionError::Cancelled {
                        class: class.to_string(),
                        next_attempt: attempt,
                        attempts,
                    });
                }
            }
            if let Some(deadline) = policy.deadline {
                if started.elapsed() >= deadline {
                    return Err(ExecutionError::DeadlineExceeded {
                        class: class.to_string(),
                        deadline,
                        attempts,
                    });
                }
            }
            if !breaker.try_acquire() {
                core_metrics().record_circuit_open_rejection();
                return Err(ExecutionError::CircuitOpen {
                    class: class.to_string(),
                });
            }

            match operation().await {
                Ok(value) => {
                    breaker.record_success();
                    if attempt > 1 {
                        debug!(class, attempt, "operation recovered");
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    let mut record = AttemptRecord {
                        attempt,
                        error: failure.message.clone(),
                        backoff: None,
                        at: chrono::Utc::now(),
                    };
                    match failure.kind {
                        FailureKind::Fatal => {
                            warn!(class, attempt, error = %failure, "fatal failure, not retrying");
                            attempts.push(record);
                            return Err(ExecutionError::Fatal {
                                class: class.to_string(),
                                attempts,
                            });
                        }
                        FailureKind::Retryable => {
                            breaker.record_failure();
                            if attempt == max_attempts {
                                warn!(class, attempt, error = %failure, "retries exhausted");
                                attempts.push(record);
                                return Err(ExecutionError::AttemptsExhausted {
                                    class: class.to_string(),
                                    attempts,
                                });
                            }

                            let delay = policy.jittered_delay(attempt, rng.as_mut());
                            if let Some(deadline) = policy.deadline {
                                if started.elapsed() + delay >= deadline {
                                    attempts.push(record);
                                    return Err(ExecutionError::DeadlineExceeded {
                                        class: class.to_string(),
                                        deadline,
                                        attempts,
                                    });
                                }
                            }
                            warn!(
                                class,
                                attempt,
                                error = %failure,
                                backoff_ms = delay.as_millis() as u64,
                                "retryable failure, backing off"
                            );
                            record.backoff = Some(delay);
                            attempts.push(record);
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
            }
        }

        unreachable!("retry loop returns on the final attempt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(fast_policy(3), CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let result = executor
            .execute("persistence-write", move || {
                let calls = Arc::clone(&counted);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OperationFailure::retryable("connection refused"))
                    } else {
                        Ok("stored")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failures_never_retry() {
        let executor = RetryExecutor::new(fast_policy(5), CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let result: Result<(), _> = executor
            .execute("persistence-write", move || {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OperationFailure::fatal("validation failed"))
                }
            })
            .await;

        assert!(matches!(result, Err(ExecutionError::Fatal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_full_attempt_history() {
        let executor = RetryExecutor::new(fast_policy(3), CircuitBreakerConfig::default());

        let result: Result<(), _> = executor
            .execute("persistence-write", || async {
                Err(OperationFailure::retryable("io timeout"))
            })
            .await;

        match result {
            Err(ExecutionError::AttemptsExhausted { attempts, .. }) => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts.iter().all(|a| a.error == "io timeout"));
                // Every attempt but the last slept before the next one
                assert!(attempts[..2].iter().all(|a| a.backoff.is_some()));
                assert!(attempts[2].backoff.is_none());
            }
            other => panic!("expected AttemptsExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_short_circuits_without_calling_operation() {
        let executor = RetryExecutor::new(
            fast_policy(1),
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            },
        );

        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counted = Arc::clone(&calls);
            let _: Result<(), _> = executor
                .execute("notification-dispatch", move || {
                    let calls = Arc::clone(&counted);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(OperationFailure::retryable("smtp down"))
                    }
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Fourth call: the collaborator is never invoked.
        let counted = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute("notification-dispatch", move || {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OperationFailure::retryable("smtp down"))
                }
            })
            .await;

        assert!(matches!(result, Err(ExecutionError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn breakers_are_isolated_per_class() {
        let executor = RetryExecutor::new(
            fast_policy(1),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );

        let _: Result<(), _> = executor
            .execute("notification-dispatch", || async {
                Err(OperationFailure::retryable("down"))
            })
            .await;
        assert_eq!(
            executor.breaker("notification-dispatch").state(),
            CircuitState::Open
        );

        // Persistence still flows.
        let result = executor
            .execute("persistence-write", || async { Ok(1u64) })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_remaining_attempts() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(400),
            strategy: BackoffStrategy::Fixed,
            deadline: Some(Duration::from_millis(500)),
            ..RetryPolicy::default()
        };
        let executor = RetryExecutor::new(policy, CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let result: Result<(), _> = executor
            .execute("persistence-write", move || {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OperationFailure::retryable("slow disk"))
                }
            })
            .await;

        assert!(matches!(result, Err(ExecutionError::DeadlineExceeded { .. })));
        // attempt 1 at t=0, sleeps 400ms; attempt 2 at t=400ms; the 400ms
        // backoff before attempt 3 would cross the 500ms deadline.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_prevents_new_attempts_only() {
        let executor = RetryExecutor::new(fast_policy(5), CircuitBreakerConfig::default());
        let token = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let cancel_after_first = token.clone();

        let result: Result<(), _> = executor
            .execute_cancellable(
                "persistence-write",
                move || {
                    let calls = Arc::clone(&counted);
                    let token = cancel_after_first.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Cancel mid-attempt: this attempt still finishes.
                        token.cancel();
                        Err(OperationFailure::retryable("interrupted"))
                    }
                },
                Some(&token),
            )
            .await;

        match result {
            Err(ExecutionError::Cancelled {
                next_attempt,
                attempts,
                ..
            }) => {
                assert_eq!(next_attempt, 2);
                assert_eq!(attempts.len(), 1);
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
