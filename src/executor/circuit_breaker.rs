// Circuit breaker: stops calling a failing operation class until a
// cooldown elapses, then probes with a single trial attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests fail fast without touching the operation.
    Open,
    /// Cooldown elapsed; a limited number of trial attempts probe recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{label}")
    }
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

fn decode(state: u8) -> CircuitState {
    match state {
        OPEN => CircuitState::Open,
        HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long an open circuit rejects before allowing a probe.
    pub recovery_timeout: Duration,
    /// Trial attempts admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Breaker for one operation class, shared across every concurrent
/// execution of that class.
///
/// The fast path (`try_acquire` on a closed circuit) is a single atomic
/// load; the mutex only guards state transitions and `opened_at`.
#[derive(Debug)]
pub struct CircuitBreaker {
    class: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_probes: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(class: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            class: class.into(),
            config,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_probes: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn state(&self) -> CircuitState {
        decode(self.state.load(Ordering::SeqCst))
    }

    /// Ask permission to run one attempt. Returns `false` when the caller
    /// must fail fast with `CircuitOpen`.
    pub fn try_acquire(&self) -> bool {
        match self.state.load(Ordering::SeqCst) {
            CLOSED => true,
            HALF_OPEN => self.acquire_probe(),
            _open => {
                let guard = self.opened_at.lock().unwrap();
                let elapsed_out = guard.map(|at| at.elapsed() >= self.config.recovery_timeout);
                if elapsed_out != Some(true) {
                    return false;
                }
                // Cooldown elapsed: move to half-open and take a probe slot.
                if self.state.load(Ordering::SeqCst) == OPEN {
                    info!(class = %self.class, "circuit half-open after recovery timeout");
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    self.half_open_probes.store(0, Ordering::SeqCst);
                    self.state.store(HALF_OPEN, Ordering::SeqCst);
                }
                drop(guard);
                self.acquire_probe()
            }
        }
    }

    fn acquire_probe(&self) -> bool {
        self.half_open_probes.fetch_add(1, Ordering::SeqCst) < self.config.half_open_max_probes
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::SeqCst) {
            CLOSED => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            HALF_OPEN => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    info!(class = %self.class, successes, "circuit closed after recovery");
                    self.close();
                } else {
                    // More probes needed to confirm recovery.
                    self.half_open_probes.store(0, Ordering::SeqCst);
                }
            }
            _open => {}
        }
    }

    /// Record a retryable failure. Fatal failures never reach the breaker;
    /// they say nothing about the health of the operation class.
    pub fn record_failure(&self) {
        match self.state.load(Ordering::SeqCst) {
            CLOSED => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(class = %self.class, failures, "circuit opened");
                    self.open();
                }
            }
            HALF_OPEN => {
                warn!(class = %self.class, "circuit re-opened after failed probe");
                self.open();
            }
            _open => {}
        }
    }

    /// Administrative reset back to closed.
    pub fn reset(&self) {
        info!(class = %self.class, "circuit reset");
        self.close();
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            class: self.class.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            half_open_successes: self.half_open_successes.load(Ordering::SeqCst),
        }
    }

    fn open(&self) {
        let mut opened_at = self.opened_at.lock().unwrap();
        *opened_at = Some(Instant::now());
        self.half_open_successes.store(0, Ordering::SeqCst);
        self.half_open_probes.store(0, Ordering::SeqCst);
        self.state.store(OPEN, Ordering::SeqCst);
    }

    fn close(&self) {
        let mut opened_at = self.opened_at.lock().unwrap();
        *opened_at = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.half_open_successes.store(0, Ordering::SeqCst);
        self.half_open_probes.store(0, Ordering::SeqCst);
        self.state.store(CLOSED, Ordering::SeqCst);
    }
}

/// Point-in-time view for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub class: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            half_open_max_probes: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("persistence-write", test_config());
        assert!(breaker.try_acquire());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new("persistence-write", test_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new("notification-dispatch", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Probe budget spent until the probe reports back
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn success_threshold_closes_from_half_open() {
        let breaker = CircuitBreaker::new("notification-dispatch", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // First success re-arms the probe budget
        assert!(breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("audit-write", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(breaker.try_acquire());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_closes_administratively() {
        let breaker = CircuitBreaker::new("persistence-write", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
    }
}
