// In-memory request store for tests and the CLI simulator.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{RequestStore, StorageError, StoredRequest};
use crate::workflow::{RequestId, ServiceRequest, WorkflowAction};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    requests: RwLock<HashMap<RequestId, StoredRequest>>,
    counters: RwLock<HashMap<(String, WorkflowAction, NaiveDate), u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn load(&self, id: RequestId) -> Result<StoredRequest, StorageError> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn save(
        &self,
        request: &ServiceRequest,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut requests = self.requests.write().await;
        let current = requests.get(&request.id).map(|s| s.version).unwrap_or(0);
        if current != expected_version {
            return Err(StorageError::VersionConflict {
                id: request.id,
                expected: expected_version,
                current,
            });
        }
        let new_version = current + 1;
        requests.insert(
            request.id,
            StoredRequest {
                request: request.clone(),
                version: new_version,
            },
        );
        Ok(new_version)
    }

    async fn action_count_today(
        &self,
        actor_id: &str,
        action: WorkflowAction,
    ) -> Result<u64, StorageError> {
        let today = Utc::now().date_naive();
        Ok(self
            .counters
            .read()
            .await
            .get(&(actor_id.to_string(), action, today))
            .copied()
            .unwrap_or(0))
    }

    async fn record_action(
        &self,
        actor_id: &str,
        action: WorkflowAction,
    ) -> Result<(), StorageError> {
        let today = Utc::now().date_naive();
        *self
            .counters
            .write()
            .await
            .entry((actor_id.to_string(), action, today))
            .or_insert(0) += 1;
        Ok(())
    }
}
