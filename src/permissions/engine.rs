// Pure permission checks against the static grant table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::matrix::PermissionMatrix;
use crate::workflow::types::{Role, WorkflowAction, WorkflowType};

/// Why an authorization was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No grant exists for the (role, action, workflow type) combination.
    NoMatchingGrant,
    /// A grant exists but its daily limit is already spent.
    DailyLimitExceeded,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::NoMatchingGrant => "no_matching_grant",
            DenialReason::DailyLimitExceeded => "daily_limit_exceeded",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Stateless permission engine. Pure lookup against the matrix: no I/O,
/// no mutation, identical inputs always yield identical decisions.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    matrix: Arc<PermissionMatrix>,
}

impl PermissionEngine {
    pub fn new(matrix: Arc<PermissionMatrix>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    /// Authorize `role` to perform `action` on `workflow_type`.
    ///
    /// `daily_count_so_far` is supplied by the caller (the orchestration
    /// service reads it from the storage collaborator); the engine only
    /// compares it against the grant's limit. Unknown combinations deny
    /// fail-closed.
    pub fn authorize(
        &self,
        role: Role,
        action: WorkflowAction,
        workflow_type: WorkflowType,
        daily_count_so_far: u64,
    ) -> Decision {
        let Some(grant) = self.matrix.lookup(role, action, workflow_type) else {
            return Decision::deny(DenialReason::NoMatchingGrant);
        };
        if let Some(limit) = grant.daily_limit {
            if daily_count_so_far >= u64::from(limit) {
                return Decision::deny(DenialReason::DailyLimitExceeded);
            }
        }
        Decision::allow()
    }
}
