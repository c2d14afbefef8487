// Permission engine: pure grant lookups gating every transition.

pub mod engine;
pub mod matrix;

pub use engine::{Decision, DenialReason, PermissionEngine};
pub use matrix::{Grant, PermissionMatrix};
