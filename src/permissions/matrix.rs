// Static permission matrix: (role, action, workflow type) -> grant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::workflow::types::{Role, WorkflowAction, WorkflowType};

/// A single allowance in the matrix. Presence means "allowed"; absence
/// denies by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub role: Role,
    pub action: WorkflowAction,
    pub workflow_type: WorkflowType,
    /// Per-role cap on how often the action may run within a rolling UTC
    /// day. `None` means unlimited.
    pub daily_limit: Option<u32>,
}

/// Immutable grant table, built once at process start and shared by
/// reference into the engine and state machine. Tests inject alternate
/// tables through [`PermissionMatrix::from_grants`].
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    grants: HashMap<(Role, WorkflowAction, WorkflowType), Grant>,
}

impl PermissionMatrix {
    pub fn from_grants(grants: impl IntoIterator<Item = Grant>) -> Self {
        Self {
            grants: grants
                .into_iter()
                .map(|g| ((g.role, g.action, g.workflow_type), g))
                .collect(),
        }
    }

    pub fn lookup(
        &self,
        role: Role,
        action: WorkflowAction,
        workflow_type: WorkflowType,
    ) -> Option<&Grant> {
        self.grants.get(&(role, action, workflow_type))
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// All grants, sorted for stable display output.
    pub fn grants(&self) -> Vec<Grant> {
        let mut all: Vec<Grant> = self.grants.values().copied().collect();
        all.sort_by_key(|g| (g.role.as_str(), g.workflow_type.as_str(), g.action.as_str()));
        all
    }

    /// The standard production table.
    pub fn standard() -> Self {
        use Role::*;
        use WorkflowAction::*;
        use WorkflowType::*;

        let grant = |role, action, workflow_type, daily_limit| Grant {
            role,
            action,
            workflow_type,
            daily_limit,
        };

        Self::from_grants([
            // connection_request: Manager -> JuniorManager -> Controller
            //   -> Technician -> Warehouse
            grant(Manager, Create, ConnectionRequest, Some(50)),
            grant(Manager, View, ConnectionRequest, None),
            grant(Manager, Advance, ConnectionRequest, None),
            grant(Manager, Escalate, ConnectionRequest, Some(10)),
            grant(Manager, Cancel, ConnectionRequest, None),
            grant(JuniorManager, View, ConnectionRequest, None),
            grant(JuniorManager, Advance, ConnectionRequest, None),
            grant(JuniorManager, Return, ConnectionRequest, None),
            grant(Controller, View, ConnectionRequest, None),
            grant(Controller, Advance, ConnectionRequest, None),
            grant(Controller, Return, ConnectionRequest, None),
            grant(Controller, AssignDirectly, ConnectionRequest, Some(20)),
            grant(Technician, View, ConnectionRequest, None),
            grant(Technician, Advance, ConnectionRequest, None),
            grant(Technician, Return, ConnectionRequest, None),
            grant(Warehouse, View, ConnectionRequest, None),
            grant(Warehouse, Advance, ConnectionRequest, None),
            // technical_service: CallCenterOperator -> Controller -> Technician
            grant(CallCenterOperator, Create, TechnicalService, Some(100)),
            grant(CallCenterOperator, View, TechnicalService, None),
            grant(CallCenterOperator, Advance, TechnicalService, None),
            grant(Controller, View, TechnicalService, None),
            grant(Controller, Advance, TechnicalService, None),
            grant(Controller, Return, TechnicalService, None),
            grant(Technician, View, TechnicalService, None),
            grant(Technician, Advance, TechnicalService, None),
            grant(ServiceCenterManager, View, TechnicalService, None),
            grant(ServiceCenterManager, Escalate, TechnicalService, Some(20)),
            grant(ServiceCenterManager, Cancel, TechnicalService, None),
            // call_center_direct: CallCenterOperator -> CallCenterSupervisor
            //   -> Technician
            grant(CallCenterOperator, Create, CallCenterDirect, Some(100)),
            grant(CallCenterOperator, View, CallCenterDirect, None),
            grant(CallCenterOperator, Advance, CallCenterDirect, None),
            grant(CallCenterSupervisor, View, CallCenterDirect, None),
            grant(CallCenterSupervisor, Advance, CallCenterDirect, None),
            grant(CallCenterSupervisor, Return, CallCenterDirect, None),
            grant(CallCenterSupervisor, Escalate, CallCenterDirect, Some(15)),
            grant(Technician, View, CallCenterDirect, None),
            grant(Technician, Advance, CallCenterDirect, None),
            // administrator oversight across all workflow types
            grant(Administrator, View, ConnectionRequest, None),
            grant(Administrator, View, TechnicalService, None),
            grant(Administrator, View, CallCenterDirect, None),
            grant(Administrator, Cancel, ConnectionRequest, None),
            grant(Administrator, Cancel, TechnicalService, None),
            grant(Administrator, Cancel, CallCenterDirect, None),
        ])
    }
}
