//! flowline - a declarative workflow runner: event triggers, matrix
//! fan-out, cached environment provisioning and ordered step execution

pub mod action;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use crate::action::{Action, ActionContext, ActionError, ActionOutcome, ActionRegistry};
pub use crate::core::config::WorkflowConfig;
pub use crate::core::{Event, EventKind, ExecutionStatus, FlowError, Job, JobInstance, Step, Workflow};
pub use crate::execution::{
    cancel_pair, CancelHandle, CancelToken, EngineOptions, ExecutionEngine, ExecutionEvent,
    LocalProvisioner, ProvisionCache, RunReport, SchedulingStrategy,
};
