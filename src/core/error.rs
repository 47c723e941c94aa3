//! Error kinds surfaced by the executor

use thiserror::Error;

/// Errors raised while turning a workflow into runnable job instances or
/// while running them.
///
/// A trigger that does not match an event is not an error: resolution simply
/// yields no workflows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("job '{job}' references undefined matrix value '{reference}'")]
    MatrixExpansion { job: String, reference: String },

    #[error("job '{job}' declares matrix axis '{axis}' with no values")]
    EmptyMatrixAxis { job: String, axis: String },

    #[error("job '{job}' has no instances left after matrix exclusions")]
    NoInstances { job: String },

    #[error("provisioning failed for '{instance}': {message}")]
    Provisioning { instance: String, message: String },

    #[error("step '{step}' failed: {reason}")]
    StepFailure { step: String, reason: String },

    #[error("step '{step}' timed out after {secs} seconds")]
    Timeout { step: String, secs: u64 },

    #[error("step '{step}' stopped by the job timeout of {secs} seconds")]
    JobTimeout { step: String, secs: u64 },

    #[error("execution was cancelled")]
    Cancelled,
}
