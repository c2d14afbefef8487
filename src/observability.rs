use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Process-wide counters for the orchestration core.
#[derive(Debug, Default)]
pub struct CoreMetrics {
    pub requests_created: AtomicU64,
    pub transitions_granted: AtomicU64,
    pub transitions_denied: AtomicU64,
    pub audit_write_failures: AtomicU64,
    pub circuit_open_rejections: AtomicU64,
    pub notifications_failed: AtomicU64,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_created(&self) {
        self.requests_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_granted(&self) {
        self.transitions_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_denied(&self) {
        self.transitions_denied.fetch_add(1, Ordering::Relaxed);
    }

    /// Audit writes are advisory; failures are counted here for alerting
    /// instead of propagating to the caller.
    pub fn record_audit_write_failure(&self) {
        self.audit_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open_rejection(&self) {
        self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> CoreStats {
        CoreStats {
            requests_created: self.requests_created.load(Ordering::Relaxed),
            transitions_granted: self.transitions_granted.load(Ordering::Relaxed),
            transitions_denied: self.transitions_denied.load(Ordering::Relaxed),
            audit_write_failures: self.audit_write_failures.load(Ordering::Relaxed),
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "core metrics: created={}, granted={}, denied={}, audit_failures={}, circuit_rejections={}, notification_failures={}",
            stats.requests_created,
            stats.transitions_granted,
            stats.transitions_denied,
            stats.audit_write_failures,
            stats.circuit_open_rejections,
            stats.notifications_failed
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStats {
    pub requests_created: u64,
    pub transitions_granted: u64,
    pub transitions_denied: u64,
    pub audit_write_failures: u64,
    pub circuit_open_rejections: u64,
    pub notifications_failed: u64,
}

/// Global metrics instance
static CORE_METRICS: std::sync::LazyLock<CoreMetrics> = std::sync::LazyLock::new(CoreMetrics::new);

pub fn core_metrics() -> &'static CoreMetrics {
    &CORE_METRICS
}
