// Orchestration service: the public façade over the workflow core.

pub mod locks;
pub mod service;

pub use locks::RequestLocks;
pub use service::Orchestrator;
