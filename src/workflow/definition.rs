// Static workflow definitions: ordered stages plus explicit per-action
// outcomes. Defined once at process start, validated at load time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::types::{RequestStatus, Role, WorkflowAction, WorkflowType};

/// What a permitted action does to a request at a given stage. Outcomes
/// are codified explicitly, never inferred from the action name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Move to the next stage in order.
    Advance { to: Role },
    /// Advance out of the final stage: the request is done.
    Complete,
    /// Send back to an earlier stage for rework.
    Return { to: Role },
    /// Skip ahead (or sideways) to a named stage.
    Jump { to: Role },
    /// Stay put; raise priority one level.
    Escalate,
    /// Terminate the request regardless of stage.
    Cancel,
}

impl StageOutcome {
    /// Destination stage, when the outcome moves the request.
    pub fn destination(self) -> Option<Role> {
        match self {
            StageOutcome::Advance { to }
            | StageOutcome::Return { to }
            | StageOutcome::Jump { to } => Some(to),
            StageOutcome::Complete | StageOutcome::Escalate | StageOutcome::Cancel => None,
        }
    }

    /// The status a successful transition leaves behind. `None` keeps the
    /// current status (escalation only touches priority).
    pub fn status_after(self) -> Option<RequestStatus> {
        match self {
            StageOutcome::Advance { .. } | StageOutcome::Jump { .. } => {
                Some(RequestStatus::InProgress)
            }
            StageOutcome::Complete => Some(RequestStatus::Completed),
            StageOutcome::Return { .. } => Some(RequestStatus::Blocked),
            StageOutcome::Escalate => None,
            StageOutcome::Cancel => Some(RequestStatus::Cancelled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("workflow {workflow_type} has no stages")]
    EmptyStages { workflow_type: WorkflowType },
    #[error("workflow {workflow_type} lists stage {role} more than once")]
    DuplicateStage {
        workflow_type: WorkflowType,
        role: Role,
    },
    #[error("workflow {workflow_type} has a rule for {role}, which is not a stage")]
    UnknownSourceStage {
        workflow_type: WorkflowType,
        role: Role,
    },
    #[error("workflow {workflow_type}: {action} from {from} targets {to}, which is not a stage")]
    UnknownDestination {
        workflow_type: WorkflowType,
        from: Role,
        action: WorkflowAction,
        to: Role,
    },
    #[error("workflow {workflow_type}: advance from {from} must target the next stage")]
    AdvanceOutOfOrder {
        workflow_type: WorkflowType,
        from: Role,
    },
    #[error("workflow {workflow_type}: complete is only valid from the final stage, not {from}")]
    CompleteNotFinal {
        workflow_type: WorkflowType,
        from: Role,
    },
    #[error("workflow {workflow_type}: return from {from} must target an earlier stage")]
    ReturnNotBackward {
        workflow_type: WorkflowType,
        from: Role,
    },
    #[error("workflow {workflow_type}: stage {role} has no outgoing actions")]
    DeadEndStage {
        workflow_type: WorkflowType,
        role: Role,
    },
}

/// One workflow type's stage sequence and permitted transitions.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    workflow_type: WorkflowType,
    stages: Vec<Role>,
    rules: HashMap<(Role, WorkflowAction), StageOutcome>,
}

impl WorkflowDefinition {
    /// Build and validate a definition. Validation happens here, at load
    /// time; the state machine assumes a valid definition at runtime.
    pub fn new(
        workflow_type: WorkflowType,
        stages: Vec<Role>,
        rules: impl IntoIterator<Item = (Role, WorkflowAction, StageOutcome)>,
    ) -> Result<Self, DefinitionError> {
        let rules: HashMap<(Role, WorkflowAction), StageOutcome> = rules
            .into_iter()
            .map(|(role, action, outcome)| ((role, action), outcome))
            .collect();
        let def = Self {
            workflow_type,
            stages,
            rules,
        };
        def.validate()?;
        Ok(def)
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        let wt = self.workflow_type;
        if self.stages.is_empty() {
            return Err(DefinitionError::EmptyStages { workflow_type: wt });
        }
        for (i, role) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(role) {
                return Err(DefinitionError::DuplicateStage {
                    workflow_type: wt,
                    role: *role,
                });
            }
        }

        let position = |role: Role| self.stages.iter().position(|s| *s == role);

        for (&(from, action), &outcome) in &self.rules {
            let Some(from_idx) = position(from) else {
                return Err(DefinitionError::UnknownSourceStage {
                    workflow_type: wt,
                    role: from,
                });
            };
            if let Some(to) = outcome.destination() {
                let Some(to_idx) = position(to) else {
                    return Err(DefinitionError::UnknownDestination {
                        workflow_type: wt,
                        from,
                        action,
                        to,
                    });
                };
                match outcome {
                    StageOutcome::Advance { .. } if to_idx != from_idx + 1 => {
                        return Err(DefinitionError::AdvanceOutOfOrder {
                            workflow_type: wt,
                            from,
                        });
                    }
                    StageOutcome::Return { .. } if to_idx >= from_idx => {
                        return Err(DefinitionError::ReturnNotBackward {
                            workflow_type: wt,
                            from,
                        });
                    }
                    _ => {}
                }
            } else if matches!(outcome, StageOutcome::Complete)
                && from_idx != self.stages.len() - 1
            {
                return Err(DefinitionError::CompleteNotFinal {
                    workflow_type: wt,
                    from,
                });
            }
        }

        // Every stage must have at least one way out; terminality lives in
        // the status, not the stage.
        for role in &self.stages {
            if !self.rules.keys().any(|(from, _)| from == role) {
                return Err(DefinitionError::DeadEndStage {
                    workflow_type: wt,
                    role: *role,
                });
            }
        }
        Ok(())
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn stages(&self) -> &[Role] {
        &self.stages
    }

    pub fn first_stage(&self) -> Role {
        self.stages[0]
    }

    pub fn is_stage(&self, role: Role) -> bool {
        self.stages.contains(&role)
    }

    /// The outcome of `action` taken from `stage`, if the definition
    /// permits it.
    pub fn outcome(&self, stage: Role, action: WorkflowAction) -> Option<StageOutcome> {
        self.rules.get(&(stage, action)).copied()
    }

    /// Actions available from `stage`, sorted for stable display output.
    pub fn actions_from(&self, stage: Role) -> Vec<WorkflowAction> {
        let mut actions: Vec<WorkflowAction> = self
            .rules
            .keys()
            .filter(|(from, _)| *from == stage)
            .map(|(_, action)| *action)
            .collect();
        actions.sort_by_key(|a| a.as_str());
        actions
    }
}

/// All workflow definitions known to the process. Read-only after startup,
/// shared via `Arc`.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    definitions: HashMap<WorkflowType, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = WorkflowDefinition>,
    ) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.workflow_type(), d))
                .collect(),
        }
    }

    pub fn get(&self, workflow_type: WorkflowType) -> Option<&WorkflowDefinition> {
        self.definitions.get(&workflow_type)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }

    /// The three built-in workflows.
    pub fn standard() -> Result<Arc<Self>, DefinitionError> {
        use Role::*;
        use StageOutcome::*;
        use WorkflowAction as A;

        let connection = WorkflowDefinition::new(
            WorkflowType::ConnectionRequest,
            vec![Manager, JuniorManager, Controller, Technician, Warehouse],
            [
                (Manager, A::Advance, Advance { to: JuniorManager }),
                (Manager, A::Escalate, Escalate),
                (Manager, A::Cancel, Cancel),
                (JuniorManager, A::Advance, Advance { to: Controller }),
                (JuniorManager, A::Return, Return { to: Manager }),
                (Controller, A::Advance, Advance { to: Technician }),
                (Controller, A::Return, Return { to: JuniorManager }),
                (Controller, A::AssignDirectly, Jump { to: Warehouse }),
                (Technician, A::Advance, Advance { to: Warehouse }),
                (Technician, A::Return, Return { to: Controller }),
                (Warehouse, A::Advance, Complete),
            ],
        )?;

        let technical = WorkflowDefinition::new(
            WorkflowType::TechnicalService,
            vec![CallCenterOperator, Controller, Technician],
            [
                (CallCenterOperator, A::Advance, Advance { to: Controller }),
                (CallCenterOperator, A::Escalate, Escalate),
                (Controller, A::Advance, Advance { to: Technician }),
                (Controller, A::Return, Return { to: CallCenterOperator }),
                (Controller, A::Cancel, Cancel),
                (Technician, A::Advance, Complete),
                (Technician, A::Return, Return { to: Controller }),
            ],
        )?;

        let direct = WorkflowDefinition::new(
            WorkflowType::CallCenterDirect,
            vec![CallCenterOperator, CallCenterSupervisor, Technician],
            [
                (
                    CallCenterOperator,
                    A::Advance,
                    Advance {
                        to: CallCenterSupervisor,
                    },
                ),
                (CallCenterSupervisor, A::Advance, Advance { to: Technician }),
                (
                    CallCenterSupervisor,
                    A::Return,
                    Return {
                        to: CallCenterOperator,
                    },
                ),
                (CallCenterSupervisor, A::Escalate, Escalate),
                (Technician, A::Advance, Complete),
            ],
        )?;

        Ok(Arc::new(Self::from_definitions([
            connection, technical, direct,
        ])))
    }
}
