//! Workflow execution engine

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod process;
pub mod provision;
pub mod report;
pub mod scheduler;

pub use cancel::{cancel_pair, CancelHandle, CancelToken, RunCoordinator};
pub use engine::{EngineOptions, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StepExecutor};
pub use provision::{Environment, LocalProvisioner, ProvisionCache, ProvisionError, Provisioner};
pub use report::{Failure, InstanceReport, JobReport, RunReport, StepReport};
pub use scheduler::{JobScheduler, SchedulingStrategy};
