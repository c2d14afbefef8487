// Storage collaborator contract: a key-indexed record store with
// optimistic concurrency control, plus the daily action counters the
// orchestration service feeds into the permission engine.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::workflow::{RequestId, ServiceRequest, WorkflowAction};

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("version conflict on {id}: expected {expected}, current {current}")]
    VersionConflict {
        id: RequestId,
        expected: u64,
        current: u64,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A request snapshot together with its storage version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRequest {
    pub request: ServiceRequest,
    pub version: u64,
}

/// The store the core writes through. Writes are transactional on the
/// collaborator's side; the core only supplies the expected version.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn load(&self, id: RequestId) -> Result<StoredRequest, StorageError>;

    /// Persist a snapshot. `expected_version` 0 creates a new record;
    /// otherwise the write succeeds only against the matching version and
    /// returns the new one.
    async fn save(
        &self,
        request: &ServiceRequest,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// How many times `actor_id` performed `action` today (rolling UTC
    /// day). Supplied to the permission engine for daily-limit checks.
    async fn action_count_today(
        &self,
        actor_id: &str,
        action: WorkflowAction,
    ) -> Result<u64, StorageError>;

    /// Count one granted, persisted action against today's totals.
    async fn record_action(
        &self,
        actor_id: &str,
        action: WorkflowAction,
    ) -> Result<(), StorageError>;
}
