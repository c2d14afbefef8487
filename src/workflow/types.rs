use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roles that own processing stages inside the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Manager,
    JuniorManager,
    Controller,
    Technician,
    Warehouse,
    CallCenterOperator,
    CallCenterSupervisor,
    ServiceCenterManager,
    Administrator,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Manager,
        Role::JuniorManager,
        Role::Controller,
        Role::Technician,
        Role::Warehouse,
        Role::CallCenterOperator,
        Role::CallCenterSupervisor,
        Role::ServiceCenterManager,
        Role::Administrator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::JuniorManager => "junior_manager",
            Role::Controller => "controller",
            Role::Technician => "technician",
            Role::Warehouse => "warehouse",
            Role::CallCenterOperator => "call_center_operator",
            Role::CallCenterSupervisor => "call_center_supervisor",
            Role::ServiceCenterManager => "service_center_manager",
            Role::Administrator => "administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role: {s:?}"))
    }
}

/// Category of request; fixed at creation and determines the stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    ConnectionRequest,
    TechnicalService,
    CallCenterDirect,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [
        WorkflowType::ConnectionRequest,
        WorkflowType::TechnicalService,
        WorkflowType::CallCenterDirect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::ConnectionRequest => "connection_request",
            WorkflowType::TechnicalService => "technical_service",
            WorkflowType::CallCenterDirect => "call_center_direct",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::ALL
            .into_iter()
            .find(|wt| wt.as_str() == s)
            .ok_or_else(|| format!("unknown workflow type: {s:?}"))
    }
}

/// Actions a role can perform on a request. `Create` and `View` exist only
/// in the permission matrix; the rest move a request between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Create,
    View,
    Advance,
    AssignDirectly,
    Return,
    Escalate,
    Cancel,
}

impl WorkflowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowAction::Create => "create",
            WorkflowAction::View => "view",
            WorkflowAction::Advance => "advance",
            WorkflowAction::AssignDirectly => "assign_directly",
            WorkflowAction::Return => "return",
            WorkflowAction::Escalate => "escalate",
            WorkflowAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request lifecycle status. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Open => "open",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Blocked => "blocked",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Request priority, raised one level per `Escalate` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Priority {
    /// The next level up; saturates at `High`.
    pub fn escalated(self) -> Priority {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium | Priority::High => Priority::High,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        write!(f, "{label}")
    }
}
