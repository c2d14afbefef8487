// Conveyor Library - Role-Staged Service Request Orchestration
// This exposes the core components for testing and integration

pub mod audit;
pub mod config;
pub mod executor;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod permissions;
pub mod storage;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use audit::{AuditEntry, AuditFilter, AuditLedger, AuditOutcome, AuditSink, InMemorySink};
pub use config::{ConveyorConfig, ExecutorConfig, RetrySettings, TelemetryConfig};
pub use executor::{
    BackoffStrategy, CancelToken, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    ExecutionError, FailureKind, OperationFailure, RetryExecutor, RetryPolicy,
    CLASS_AUDIT_WRITE, CLASS_NOTIFICATION_DISPATCH, CLASS_PERSISTENCE_WRITE,
};
pub use notify::{LoggingNotifier, Notifier, NotifyError};
pub use observability::{core_metrics, CoreMetrics, CoreStats};
pub use orchestrator::Orchestrator;
pub use permissions::{Decision, DenialReason, Grant, PermissionEngine, PermissionMatrix};
pub use storage::{InMemoryStore, RequestStore, StorageError, StoredRequest};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflow::{
    Creator, Priority, RequestId, RequestStatus, Role, ServiceRequest, StageOutcome, StateData,
    TransitionError, TransitionOutcome, WorkflowAction, WorkflowDefinition, WorkflowRegistry,
    WorkflowStateMachine, WorkflowType,
};
