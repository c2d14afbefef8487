// Workflow core: request model, static definitions, and the state machine
// that advances a request through role stages.

pub mod definition;
pub mod request;
pub mod state_machine;
pub mod types;

pub use definition::{DefinitionError, StageOutcome, WorkflowDefinition, WorkflowRegistry};
pub use request::{Creator, RequestId, ServiceRequest, StateData, StateDataError};
pub use state_machine::{TransitionError, TransitionOutcome, WorkflowStateMachine};
pub use types::{Priority, RequestStatus, Role, WorkflowAction, WorkflowType};
