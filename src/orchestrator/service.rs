// Orchestration service: the façade that loads and saves request state,
// gates transitions, and coordinates the state machine, executor, audit
// ledger, and collaborators.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::locks::RequestLocks;
use crate::audit::{AuditEntry, AuditFilter, AuditLedger, AuditOutcome};
use crate::executor::{
    CancelToken, ExecutionError, OperationFailure, RetryExecutor, CLASS_NOTIFICATION_DISPATCH,
    CLASS_PERSISTENCE_WRITE,
};
use crate::notify::Notifier;
use crate::observability::{core_metrics, CoreStats};
use crate::permissions::{DenialReason, PermissionEngine};
use crate::storage::{RequestStore, StorageError, StoredRequest};
use crate::workflow::{
    Creator, RequestId, Role, ServiceRequest, TransitionError, WorkflowAction, WorkflowRegistry,
    WorkflowStateMachine, WorkflowType,
};

/// Result of a persistence write routed through the executor: a conflict
/// is a definitive answer from the store, not an infrastructure failure,
/// so it must not be retried.
enum SaveOutcome {
    Saved(u64),
    Conflict,
}

pub struct Orchestrator {
    machine: WorkflowStateMachine,
    permissions: PermissionEngine,
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<RetryExecutor>,
    ledger: Arc<AuditLedger>,
    locks: RequestLocks,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        permissions: PermissionEngine,
        executor: Arc<RetryExecutor>,
        ledger: Arc<AuditLedger>,
        store: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            machine: WorkflowStateMachine::new(registry, permissions.clone()),
            permissions,
            store,
            notifier,
            executor,
            ledger,
            locks: RequestLocks::new(),
        }
    }

    /// Create a request at the first stage of its workflow.
    pub async fn create_request(
        &self,
        workflow_type: WorkflowType,
        creator: Creator,
        client_id: String,
        initial_payload: BTreeMap<String, Value>,
    ) -> Result<ServiceRequest, TransitionError> {
        let Some(definition) = self.machine.registry().get(workflow_type) else {
            return Err(TransitionError::InvalidAction {
                workflow_type,
                role: creator.actor_role,
                action: WorkflowAction::Create,
            });
        };

        let mut request = ServiceRequest::open(
            workflow_type,
            definition.first_stage(),
            creator.clone(),
            client_id,
        );

        let daily_count = self
            .daily_count(&creator.actor_id, WorkflowAction::Create)
            .await
            .map_err(|source| TransitionError::PersistenceFailed {
                id: request.id,
                source,
            })?;
        let decision = self.permissions.authorize(
            creator.actor_role,
            WorkflowAction::Create,
            workflow_type,
            daily_count,
        );
        if !decision.allowed {
            let err = TransitionError::Forbidden {
                actor_role: creator.actor_role,
                action: WorkflowAction::Create,
                workflow_type,
                reason: decision.reason.unwrap_or(DenialReason::NoMatchingGrant),
            };
            self.audit_denied(
                request.id,
                &creator.actor_id,
                creator.actor_role,
                WorkflowAction::Create,
                creator.actor_role,
                err.audit_reason(),
            )
            .await;
            return Err(err);
        }

        if let Err(payload_err) = request.state_data.merge(&initial_payload) {
            let err = TransitionError::from(payload_err);
            self.audit_denied(
                request.id,
                &creator.actor_id,
                creator.actor_role,
                WorkflowAction::Create,
                creator.actor_role,
                err.audit_reason(),
            )
            .await;
            return Err(err);
        }

        match self.persist(&request, 0, None).await {
            Ok(SaveOutcome::Saved(_)) => {}
            // A fresh UUID colliding means an external writer beat us to
            // the id; surface it like any other concurrent-write conflict.
            Ok(SaveOutcome::Conflict) => {
                let err = TransitionError::StaleVersion { id: request.id };
                self.audit_denied(
                    request.id,
                    &creator.actor_id,
                    creator.actor_role,
                    WorkflowAction::Create,
                    creator.actor_role,
                    err.audit_reason(),
                )
                .await;
                return Err(err);
            }
            Err(source) => {
                self.audit_denied(
                    request.id,
                    &creator.actor_id,
                    creator.actor_role,
                    WorkflowAction::Create,
                    creator.actor_role,
                    "persistence_failed".to_string(),
                )
                .await;
                return Err(TransitionError::PersistenceFailed {
                    id: request.id,
                    source,
                });
            }
        }

        self.count_action(&creator.actor_id, WorkflowAction::Create)
            .await;
        self.ledger
            .record(
                &self.executor,
                AuditEntry {
                    request_id: request.id,
                    actor_id: creator.actor_id.clone(),
                    actor_role: creator.actor_role,
                    action: WorkflowAction::Create,
                    from_role: creator.actor_role,
                    to_role: Some(request.current_role),
                    outcome: AuditOutcome::Granted,
                    reason: None,
                    timestamp: Utc::now(),
                },
            )
            .await;
        core_metrics().record_request_created();
        info!(
            request_id = %request.id,
            workflow_type = %workflow_type,
            creator = %creator.actor_id,
            "request created"
        );

        self.dispatch_notification(&request, "request_created");
        Ok(request)
    }

    /// Apply one action to a request. Transitions on the same id are
    /// serialized; every call, granted or denied, leaves one audit entry.
    pub async fn transition(
        &self,
        request_id: RequestId,
        actor_role: Role,
        actor_id: &str,
        action: WorkflowAction,
        payload: BTreeMap<String, Value>,
    ) -> Result<ServiceRequest, TransitionError> {
        self.transition_with_cancel(request_id, actor_role, actor_id, action, payload, None)
            .await
    }

    /// Like [`transition`](Self::transition), with cooperative
    /// cancellation. Cancelling after the persistence write has started
    /// is not honored; the write completes or exhausts its retries.
    pub async fn transition_with_cancel(
        &self,
        request_id: RequestId,
        actor_role: Role,
        actor_id: &str,
        action: WorkflowAction,
        payload: BTreeMap<String, Value>,
        cancel: Option<&CancelToken>,
    ) -> Result<ServiceRequest, TransitionError> {
        let _guard = self.locks.acquire(request_id).await;

        let stored = match self.load(request_id).await {
            Ok(stored) => stored,
            Err(err) => {
                self.audit_denied(
                    request_id,
                    actor_id,
                    actor_role,
                    action,
                    actor_role,
                    err.audit_reason(),
                )
                .await;
                core_metrics().record_transition_denied();
                return Err(err);
            }
        };
        let from_role = stored.request.current_role;

        let daily_count = match self.daily_count(actor_id, action).await {
            Ok(count) => count,
            Err(source) => {
                self.audit_denied(
                    request_id,
                    actor_id,
                    actor_role,
                    action,
                    from_role,
                    "persistence_failed".to_string(),
                )
                .await;
                core_metrics().record_transition_denied();
                return Err(TransitionError::PersistenceFailed {
                    id: request_id,
                    source,
                });
            }
        };

        let outcome = match self.machine.transition(
            &stored.request,
            actor_role,
            actor_id,
            action,
            &payload,
            daily_count,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.audit_denied(
                    request_id,
                    actor_id,
                    actor_role,
                    action,
                    from_role,
                    err.audit_reason(),
                )
                .await;
                core_metrics().record_transition_denied();
                return Err(err);
            }
        };

        match self.persist(&outcome.request, stored.version, cancel).await {
            Ok(SaveOutcome::Saved(_)) => {}
            Ok(SaveOutcome::Conflict) => {
                let err = TransitionError::StaleVersion { id: request_id };
                self.audit_denied(
                    request_id,
                    actor_id,
                    actor_role,
                    action,
                    from_role,
                    err.audit_reason(),
                )
                .await;
                core_metrics().record_transition_denied();
                return Err(err);
            }
            Err(source) => {
                self.audit_denied(
                    request_id,
                    actor_id,
                    actor_role,
                    action,
                    from_role,
                    "persistence_failed".to_string(),
                )
                .await;
                core_metrics().record_transition_denied();
                return Err(TransitionError::PersistenceFailed {
                    id: request_id,
                    source,
                });
            }
        }

        self.count_action(actor_id, action).await;
        self.ledger
            .record(
                &self.executor,
                AuditEntry {
                    request_id,
                    actor_id: actor_id.to_string(),
                    actor_role,
                    action,
                    from_role: outcome.from_role,
                    to_role: Some(outcome.to_role),
                    outcome: AuditOutcome::Granted,
                    reason: None,
                    timestamp: Utc::now(),
                },
            )
            .await;
        core_metrics().record_transition_granted();
        info!(
            request_id = %request_id,
            actor_id = %actor_id,
            action = %action,
            from_role = %outcome.from_role,
            to_role = %outcome.to_role,
            status = %outcome.request.status,
            "transition applied"
        );

        self.dispatch_notification(&outcome.request, outcome.template_key);
        Ok(outcome.request)
    }

    /// Read a request, gated by the `View` permission.
    pub async fn get_request(
        &self,
        request_id: RequestId,
        actor_role: Role,
        actor_id: &str,
    ) -> Result<ServiceRequest, TransitionError> {
        let stored = self.load(request_id).await?;
        let daily_count = self
            .daily_count(actor_id, WorkflowAction::View)
            .await
            .map_err(|source| TransitionError::PersistenceFailed {
                id: request_id,
                source,
            })?;
        let decision = self.permissions.authorize(
            actor_role,
            WorkflowAction::View,
            stored.request.workflow_type,
            daily_count,
        );
        if !decision.allowed {
            return Err(TransitionError::Forbidden {
                actor_role,
                action: WorkflowAction::View,
                workflow_type: stored.request.workflow_type,
                reason: decision.reason.unwrap_or(DenialReason::NoMatchingGrant),
            });
        }
        Ok(stored.request)
    }

    pub async fn get_audit_trail(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.ledger.query(filter).await
    }

    /// Administrative: close the circuit for an operation class.
    pub fn reset_circuit(&self, operation_class: &str) {
        info!(class = %operation_class, "administrative circuit reset");
        self.executor.reset(operation_class);
    }

    pub fn metrics(&self) -> CoreStats {
        core_metrics().get_stats()
    }

    async fn load(&self, id: RequestId) -> Result<StoredRequest, TransitionError> {
        let store = Arc::clone(&self.store);
        let result = self
            .executor
            .execute(CLASS_PERSISTENCE_WRITE, move || {
                let store = Arc::clone(&store);
                async move {
                    match store.load(id).await {
                        Ok(stored) => Ok(Some(stored)),
                        Err(StorageError::NotFound(_)) => Ok(None),
                        Err(err) => Err(OperationFailure::retryable(err.to_string())),
                    }
                }
            })
            .await;
        match result {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Err(TransitionError::NotFound(id)),
            Err(source) => Err(TransitionError::PersistenceFailed { id, source }),
        }
    }

    async fn persist(
        &self,
        request: &ServiceRequest,
        expected_version: u64,
        cancel: Option<&CancelToken>,
    ) -> Result<SaveOutcome, ExecutionError> {
        let store = Arc::clone(&self.store);
        let request = request.clone();
        self.executor
            .execute_cancellable(
                CLASS_PERSISTENCE_WRITE,
                move || {
                    let store = Arc::clone(&store);
                    let request = request.clone();
                    async move {
                        match store.save(&request, expected_version).await {
                            Ok(version) => Ok(SaveOutcome::Saved(version)),
                            Err(StorageError::VersionConflict { .. }) => Ok(SaveOutcome::Conflict),
                            Err(StorageError::NotFound(id)) => Err(OperationFailure::fatal(
                                format!("request {id} vanished during save"),
                            )),
                            Err(StorageError::Unavailable(msg)) => {
                                Err(OperationFailure::retryable(msg))
                            }
                        }
                    }
                },
                cancel,
            )
            .await
    }

    /// Daily action count for the permission engine, read from the
    /// storage collaborator through the executor.
    async fn daily_count(
        &self,
        actor_id: &str,
        action: WorkflowAction,
    ) -> Result<u64, ExecutionError> {
        let store = Arc::clone(&self.store);
        let actor_id = actor_id.to_string();
        self.executor
            .execute(CLASS_PERSISTENCE_WRITE, move || {
                let store = Arc::clone(&store);
                let actor_id = actor_id.clone();
                async move {
                    store
                        .action_count_today(&actor_id, action)
                        .await
                        .map_err(|err| OperationFailure::retryable(err.to_string()))
                }
            })
            .await
    }

    /// Count a granted, persisted action. The transition already
    /// committed, so a lost count is logged rather than surfaced.
    async fn count_action(&self, actor_id: &str, action: WorkflowAction) {
        if let Err(err) = self.store.record_action(actor_id, action).await {
            warn!(actor_id = %actor_id, action = %action, error = %err, "daily counter update failed");
        }
    }

    async fn audit_denied(
        &self,
        request_id: RequestId,
        actor_id: &str,
        actor_role: Role,
        action: WorkflowAction,
        from_role: Role,
        reason: String,
    ) {
        self.ledger
            .record(
                &self.executor,
                AuditEntry {
                    request_id,
                    actor_id: actor_id.to_string(),
                    actor_role,
                    action,
                    from_role,
                    to_role: None,
                    outcome: AuditOutcome::Denied,
                    reason: Some(reason),
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    /// Best-effort notification: spawned so delivery never holds up the
    /// caller, routed through the executor so a failing channel trips its
    /// own breaker instead of being hammered.
    fn dispatch_notification(&self, request: &ServiceRequest, template_key: &'static str) {
        let executor = Arc::clone(&self.executor);
        let notifier = Arc::clone(&self.notifier);
        let recipient = request.client_id.clone();
        let parameters: BTreeMap<String, String> = [
            ("request_id".to_string(), request.id.to_string()),
            (
                "workflow_type".to_string(),
                request.workflow_type.to_string(),
            ),
            ("stage".to_string(), request.current_role.to_string()),
            ("status".to_string(), request.status.to_string()),
        ]
        .into();

        tokio::spawn(async move {
            let result = executor
                .execute(CLASS_NOTIFICATION_DISPATCH, move || {
                    let notifier = Arc::clone(&notifier);
                    let recipient = recipient.clone();
                    let parameters = parameters.clone();
                    async move {
                        notifier
                            .dispatch(&recipient, template_key, parameters)
                            .await
                            .map_err(|err| OperationFailure::retryable(err.to_string()))
                    }
                })
                .await;
            if let Err(err) = result {
                warn!(error = %err, template_key, "notification delivery abandoned");
                core_metrics().record_notification_failed();
            }
        });
    }
}
