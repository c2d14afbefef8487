// Append-only audit ledger: every transition attempt, granted or denied,
// leaves exactly one immutable entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::error;

use crate::executor::{OperationFailure, RetryExecutor, CLASS_AUDIT_WRITE};
use crate::observability::core_metrics;
use crate::workflow::{RequestId, Role, WorkflowAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Granted,
    Denied,
}

/// Write-once record of one transition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: RequestId,
    pub actor_id: String,
    pub actor_role: Role,
    pub action: WorkflowAction,
    pub from_role: Role,
    pub to_role: Option<Role>,
    pub outcome: AuditOutcome,
    /// Free-text reason, set for denials.
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Filter for the read path. All fields are optional and conjunctive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub request_id: Option<RequestId>,
    pub actor_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn for_request(request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::default()
        }
    }

    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(id) = self.request_id {
            if entry.request_id != id {
                return false;
            }
        }
        if let Some(actor) = &self.actor_id {
            if entry.actor_id != *actor {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Durable destination for audit entries. The in-memory sink ships for
/// tests and the CLI simulator; production wires a persistent one.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;
    async fn entries(&self) -> Vec<AuditEntry>;
}

#[derive(Debug, Default)]
pub struct InMemorySink {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemorySink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

/// The ledger: fire-and-forget writes from the caller's perspective,
/// filtered timestamp-ordered reads.
pub struct AuditLedger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLedger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySink::new()))
    }

    /// Record an entry through the executor under the `audit-write` class.
    ///
    /// Audit is advisory: a failed write is logged locally and counted for
    /// alerting, and never blocks or rolls back the originating
    /// transition.
    pub async fn record(&self, executor: &RetryExecutor, entry: AuditEntry) {
        let sink = Arc::clone(&self.sink);
        let result = executor
            .execute(CLASS_AUDIT_WRITE, move || {
                let sink = Arc::clone(&sink);
                let entry = entry.clone();
                async move {
                    sink.append(entry)
                        .await
                        .map_err(|e| OperationFailure::retryable(e.to_string()))
                }
            })
            .await;

        if let Err(err) = result {
            error!(error = %err, "audit write failed; entry dropped to local log only");
            core_metrics().record_audit_write_failure();
        }
    }

    /// Entries matching `filter`, ordered by timestamp ascending.
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut matching: Vec<AuditEntry> = self
            .sink
            .entries()
            .await
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        matching.sort_by_key(|e| e.timestamp);
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(actor: &str, offset_secs: i64) -> AuditEntry {
        AuditEntry {
            request_id: RequestId::new(),
            actor_id: actor.to_string(),
            actor_role: Role::Manager,
            action: WorkflowAction::Advance,
            from_role: Role::Manager,
            to_role: Some(Role::JuniorManager),
            outcome: AuditOutcome::Granted,
            reason: None,
            timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn query_orders_by_timestamp_ascending() {
        let ledger = AuditLedger::in_memory();
        let executor = RetryExecutor::default();
        ledger.record(&executor, entry("b", 10)).await;
        ledger.record(&executor, entry("a", -10)).await;
        ledger.record(&executor, entry("c", 0)).await;

        let all = ledger.query(&AuditFilter::default()).await;
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn filters_compose_conjunctively() {
        let ledger = AuditLedger::in_memory();
        let executor = RetryExecutor::default();
        let target = entry("target", 0);
        let target_request = target.request_id;
        ledger.record(&executor, target.clone()).await;
        ledger.record(&executor, entry("target", 5)).await;
        ledger.record(&executor, entry("other", 0)).await;

        let by_actor = ledger.query(&AuditFilter::for_actor("target")).await;
        assert_eq!(by_actor.len(), 2);

        let by_request = ledger.query(&AuditFilter::for_request(target_request)).await;
        assert_eq!(by_request.len(), 1);
        assert_eq!(by_request[0], target);

        let by_both = ledger
            .query(&AuditFilter {
                request_id: Some(target_request),
                actor_id: Some("other".to_string()),
                ..AuditFilter::default()
            })
            .await;
        assert!(by_both.is_empty());
    }

    #[tokio::test]
    async fn query_is_restartable() {
        let ledger = AuditLedger::in_memory();
        let executor = RetryExecutor::default();
        ledger.record(&executor, entry("a", 0)).await;

        let first = ledger.query(&AuditFilter::default()).await;
        let second = ledger.query(&AuditFilter::default()).await;
        assert_eq!(first, second);
    }
}
