// Workflow state machine: computes the next request snapshot for a
// permitted, authorized action. Pure with respect to I/O; persistence,
// audit, and notification are composed around it by the orchestrator.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::definition::{StageOutcome, WorkflowRegistry};
use super::request::{RequestId, ServiceRequest, StateDataError};
use super::types::{RequestStatus, Role, WorkflowAction, WorkflowType};
use crate::executor::ExecutionError;
use crate::permissions::{DenialReason, PermissionEngine};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("request {id} is {status} and accepts no further transitions")]
    Terminal { id: RequestId, status: RequestStatus },

    #[error("{action} is not available from stage {role} in {workflow_type}")]
    InvalidAction {
        workflow_type: WorkflowType,
        role: Role,
        action: WorkflowAction,
    },

    #[error("{actor_role} may not {action} on {workflow_type}: {reason}")]
    Forbidden {
        actor_role: Role,
        action: WorkflowAction,
        workflow_type: WorkflowType,
        reason: DenialReason,
    },

    #[error(transparent)]
    InvalidPayload(#[from] StateDataError),

    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("request {id} was modified concurrently; reload and retry")]
    StaleVersion { id: RequestId },

    #[error("persisting request {id} failed")]
    PersistenceFailed {
        id: RequestId,
        #[source]
        source: ExecutionError,
    },
}

impl TransitionError {
    /// Short audit-friendly reason string for a denied attempt.
    pub fn audit_reason(&self) -> String {
        match self {
            TransitionError::Terminal { status, .. } => format!("terminal_status:{status}"),
            TransitionError::InvalidAction { .. } => "invalid_action".to_string(),
            TransitionError::Forbidden { reason, .. } => reason.as_str().to_string(),
            TransitionError::InvalidPayload(StateDataError::ReservedKey { key }) => {
                format!("reserved_key:{key}")
            }
            TransitionError::InvalidPayload(StateDataError::ImmutableKey { key }) => {
                format!("immutable_key:{key}")
            }
            TransitionError::NotFound(_) => "not_found".to_string(),
            TransitionError::StaleVersion { .. } => "stale_version".to_string(),
            TransitionError::PersistenceFailed { .. } => "persistence_failed".to_string(),
        }
    }
}

/// The computed result of a granted transition, ready to persist.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub request: ServiceRequest,
    pub from_role: Role,
    pub to_role: Role,
    pub action: WorkflowAction,
    /// Template handed to the notification collaborator; rendering is
    /// entirely external.
    pub template_key: &'static str,
}

/// Owns the per-request transition algorithm. Consults the permission
/// engine and the workflow definitions; never touches storage.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    registry: Arc<WorkflowRegistry>,
    permissions: PermissionEngine,
}

impl WorkflowStateMachine {
    pub fn new(registry: Arc<WorkflowRegistry>, permissions: PermissionEngine) -> Self {
        Self {
            registry,
            permissions,
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Compute the next snapshot for `action` taken by `actor_role`.
    ///
    /// Order matters and is part of the contract: terminal check, then
    /// definition lookup, then permission gate, then payload merge. A
    /// request that fails any step is returned unchanged to the caller.
    pub fn transition(
        &self,
        request: &ServiceRequest,
        actor_role: Role,
        actor_id: &str,
        action: WorkflowAction,
        payload: &BTreeMap<String, Value>,
        daily_count: u64,
    ) -> Result<TransitionOutcome, TransitionError> {
        if request.is_terminal() {
            return Err(TransitionError::Terminal {
                id: request.id,
                status: request.status,
            });
        }

        let Some(definition) = self.registry.get(request.workflow_type) else {
            // Only reachable when a stored request names a workflow the
            // registry never loaded; structurally the same misuse as an
            // unknown action.
            return Err(TransitionError::InvalidAction {
                workflow_type: request.workflow_type,
                role: request.current_role,
                action,
            });
        };

        let Some(outcome) = definition.outcome(request.current_role, action) else {
            return Err(TransitionError::InvalidAction {
                workflow_type: request.workflow_type,
                role: request.current_role,
                action,
            });
        };

        let decision =
            self.permissions
                .authorize(actor_role, action, request.workflow_type, daily_count);
        if !decision.allowed {
            return Err(TransitionError::Forbidden {
                actor_role,
                action,
                workflow_type: request.workflow_type,
                reason: decision
                    .reason
                    .unwrap_or(DenialReason::NoMatchingGrant),
            });
        }

        let mut next = request.clone();
        let from_role = next.current_role;
        if let Some(to) = outcome.destination() {
            next.current_role = to;
        }
        if let Some(status) = outcome.status_after() {
            next.status = status;
        }
        if matches!(outcome, StageOutcome::Escalate) {
            next.priority = next.priority.escalated();
        }
        next.state_data.merge(payload)?;
        next.updated_at = Utc::now();

        debug!(
            request_id = %next.id,
            actor_id = %actor_id,
            action = %action,
            from_role = %from_role,
            to_role = %next.current_role,
            status = %next.status,
            "transition computed"
        );

        Ok(TransitionOutcome {
            from_role,
            to_role: next.current_role,
            action,
            template_key: template_for(action, &next),
            request: next,
        })
    }
}

fn template_for(action: WorkflowAction, next: &ServiceRequest) -> &'static str {
    match action {
        WorkflowAction::Create => "request_created",
        WorkflowAction::View => "request_viewed",
        WorkflowAction::Advance if next.status == RequestStatus::Completed => "request_completed",
        WorkflowAction::Advance | WorkflowAction::AssignDirectly => "request_advanced",
        WorkflowAction::Return => "request_returned",
        WorkflowAction::Escalate => "request_escalated",
        WorkflowAction::Cancel => "request_cancelled",
    }
}
