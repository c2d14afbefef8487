// Service request: the unit of work routed between role stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::types::{Priority, RequestStatus, Role, WorkflowType};

/// Opaque request identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short display: first 8 chars of the UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Who created the request, as handed over by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub actor_id: String,
    pub actor_role: Role,
    pub on_behalf_of_client: bool,
}

/// Key namespaces the core reserves for itself. Payload keys equal to one
/// of these, or nested under one (`creator.note`), are rejected at the
/// boundary.
pub const RESERVED_NAMESPACES: [&str; 3] = ["creator", "client", "workflow"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateDataError {
    #[error("payload key {key:?} collides with a reserved namespace")]
    ReservedKey { key: String },
    #[error("payload key {key:?} is already set; state data is append-only")]
    ImmutableKey { key: String },
}

/// Opaque key-value data carried across stages.
///
/// Append-only per key: stages may add keys, and may re-set a key to an
/// identical value, but never overwrite with a different value and never
/// delete. The core treats values as opaque pass-through data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData(BTreeMap<String, Value>);

impl StateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn is_reserved(key: &str) -> bool {
        RESERVED_NAMESPACES
            .iter()
            .any(|ns| key == *ns || key.starts_with(&format!("{ns}.")))
    }

    /// Merge a payload additively. The whole payload is validated before
    /// anything is written, so a rejected merge leaves the data untouched.
    pub fn merge(&mut self, payload: &BTreeMap<String, Value>) -> Result<(), StateDataError> {
        for (key, value) in payload {
            if Self::is_reserved(key) {
                return Err(StateDataError::ReservedKey { key: key.clone() });
            }
            if let Some(existing) = self.0.get(key) {
                if existing != value {
                    return Err(StateDataError::ImmutableKey { key: key.clone() });
                }
            }
        }
        for (key, value) in payload {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(())
    }
}

/// The unit of work: one client service request moving through role stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub workflow_type: WorkflowType,
    pub current_role: Role,
    pub status: RequestStatus,
    pub creator: Creator,
    pub client_id: String,
    pub priority: Priority,
    pub state_data: StateData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    /// A freshly created request sitting at the first stage of its workflow.
    pub fn open(
        workflow_type: WorkflowType,
        first_stage: Role,
        creator: Creator,
        client_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            workflow_type,
            current_role: first_stage,
            status: RequestStatus::Open,
            creator,
            client_id,
            priority: Priority::Low,
            state_data: StateData::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
