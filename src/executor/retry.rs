// Retry policy: attempt budgets and backoff delay computation.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * multiplier^(k-1)` before the k-th retry.
    Exponential,
    /// `base * k` before the k-th retry.
    Linear,
    /// `base` before every retry.
    Fixed,
    /// Retry immediately, no delay.
    Immediate,
    /// A single attempt; failures are never retried.
    NoRetry,
}

/// Per-operation-class retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub strategy: BackoffStrategy,
    /// Scale each delay by a random factor in [0.5, 1.0). Deterministic
    /// when `jitter_seed` is set.
    pub jitter: bool,
    pub jitter_seed: Option<u64>,
    /// Overall wall-clock budget across all attempts and delays.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: false,
            jitter_seed: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Attempts this policy allows. `NoRetry` collapses to one regardless
    /// of `max_attempts`.
    pub fn effective_attempts(&self) -> u32 {
        match self.strategy {
            BackoffStrategy::NoRetry => 1,
            _ => self.max_attempts.max(1),
        }
    }

    pub fn jitter_rng(&self) -> Option<StdRng> {
        if !self.jitter {
            return None;
        }
        Some(match self.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        })
    }

    /// Delay before the k-th retry (k >= 1), before jitter. The first
    /// retry of an exponential policy waits exactly `base_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = self.backoff_multiplier.powi(retry as i32 - 1);
                self.base_delay.mul_f64(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry),
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Immediate | BackoffStrategy::NoRetry => Duration::ZERO,
        };
        raw.min(self.max_delay)
    }

    /// Delay before the k-th retry with jitter applied from `rng`.
    pub fn jittered_delay(&self, retry: u32, rng: Option<&mut StdRng>) -> Duration {
        let delay = self.delay_for_retry(retry);
        match rng {
            Some(rng) if !delay.is_zero() => delay.mul_f64(rng.random_range(0.5..1.0)),
            _ => delay,
        }
    }
}

/// One attempt's outcome, kept for the caller's audit/debugging trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: String,
    /// Delay slept before the next attempt, if one followed.
    pub backoff: Option<Duration>,
    pub at: DateTime<Utc>,
}

/// Caller-side classification of an operation failure. Fatal errors
/// (permission/validation) are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// An error surfaced by a wrapped operation, tagged by the caller.
#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
