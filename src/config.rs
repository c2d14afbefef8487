use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::executor::{
    BackoffStrategy, CircuitBreakerConfig, RetryExecutor, RetryPolicy, CLASS_AUDIT_WRITE,
    CLASS_NOTIFICATION_DISPATCH, CLASS_PERSISTENCE_WRITE,
};

/// Main configuration structure for the orchestration core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConveyorConfig {
    /// Telemetry settings
    pub telemetry: TelemetryConfig,
    /// Retry/circuit-breaker executor settings
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Log level directive for the default env filter
    pub log_level: String,
    /// Emit structured JSON log lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Circuit breaker thresholds shared by all operation classes
    pub circuit_breaker: CircuitBreakerSettings,
    /// Policy applied to classes without an explicit override
    pub default_policy: RetrySettings,
    /// Per-class overrides
    pub persistence_write: RetrySettings,
    pub notification_dispatch: RetrySettings,
    pub audit_write: RetrySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive retryable failures that open a circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Cooldown before an open circuit admits a probe, in milliseconds
    pub recovery_timeout_ms: u64,
    /// Trial attempts admitted while half-open
    pub half_open_max_probes: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
    /// Fixed jitter seed for reproducible delays; unset means entropy
    pub jitter_seed: Option<u64>,
    /// Overall wall-clock budget across attempts, in milliseconds
    pub deadline_ms: Option<u64>,
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            half_open_max_probes: self.half_open_max_probes,
        }
    }
}

impl ExecutorConfig {
    /// Wire up an executor with the configured per-class policies.
    pub fn build_executor(&self) -> RetryExecutor {
        RetryExecutor::new(
            self.default_policy.to_policy(),
            self.circuit_breaker.to_breaker_config(),
        )
        .with_policy(CLASS_PERSISTENCE_WRITE, self.persistence_write.to_policy())
        .with_policy(
            CLASS_NOTIFICATION_DISPATCH,
            self.notification_dispatch.to_policy(),
        )
        .with_policy(CLASS_AUDIT_WRITE, self.audit_write.to_policy())
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            strategy: self.strategy,
            jitter: self.jitter,
            jitter_seed: self.jitter_seed,
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            jitter_seed: None,
            deadline_ms: None,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            default_policy: RetrySettings::default(),
            persistence_write: RetrySettings {
                deadline_ms: Some(60_000),
                ..RetrySettings::default()
            },
            notification_dispatch: RetrySettings {
                max_attempts: 5,
                base_delay_ms: 1_000,
                ..RetrySettings::default()
            },
            // Audit writes back off fast; they must never hold a
            // transition hostage.
            audit_write: RetrySettings {
                max_attempts: 2,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                ..RetrySettings::default()
            },
        }
    }
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ConveyorConfig {
    /// Load configuration: defaults, then `conveyor.toml` if present, then
    /// `CONVEYOR_`-prefixed environment overrides
    /// (`CONVEYOR_TELEMETRY__LOG_LEVEL=debug`).
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("conveyor.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&ConveyorConfig::default())?);
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("CONVEYOR").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
