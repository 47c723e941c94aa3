//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a workflow run or a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Not started yet
    Pending,
    /// Currently running
    Running,
    /// Finished without failures
    Success,
    /// At least one failure
    Failure,
    /// Stopped before finishing
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failure | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// A command exited non-zero
    ExitCode(i32),
    /// The step exceeded its own timeout
    Timeout,
    /// The job instance deadline was reached while the step ran
    JobTimeout,
    /// An action reported failure
    Action(String),
    /// The step could not be run at all
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode(code) => write!(f, "exit code {}", code),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::JobTimeout => write!(f, "timeout (job deadline reached)"),
            FailureReason::Action(msg) => write!(f, "action failed: {}", msg),
            FailureReason::Error(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reportable projection of a step state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepState {
    /// Not started
    Pending,
    /// Currently running
    Running { started_at: DateTime<Utc> },
    /// Finished successfully
    Succeeded {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Finished with a failure
    Failed {
        reason: FailureReason,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Never started because an earlier step failed or provisioning failed
    Skipped { reason: String },
    /// Stopped by cancellation, or never started because of it
    Cancelled {
        reason: String,
        output: Option<String>,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepState::Pending | StepState::Running { .. })
    }

    pub fn status(&self) -> StepStatus {
        match self {
            StepState::Pending => StepStatus::Pending,
            StepState::Running { .. } => StepStatus::Running,
            StepState::Succeeded { .. } => StepStatus::Success,
            StepState::Failed { .. } => StepStatus::Failure,
            StepState::Skipped { .. } => StepStatus::Skipped,
            StepState::Cancelled { .. } => StepStatus::Cancelled,
        }
    }

    /// Captured output, if the step produced any
    pub fn output(&self) -> Option<&str> {
        match self {
            StepState::Succeeded { output, .. } | StepState::Failed { output, .. } => {
                Some(output.as_str())
            }
            StepState::Cancelled { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    /// Human-readable reason for non-success terminal states
    pub fn reason(&self) -> Option<String> {
        match self {
            StepState::Failed { reason, .. } => Some(reason.to_string()),
            StepState::Skipped { reason } | StepState::Cancelled { reason, .. } => {
                Some(reason.clone())
            }
            _ => None,
        }
    }

    /// Wall-clock duration for states that ran
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = match self {
            StepState::Succeeded {
                started_at,
                completed_at,
                ..
            } => (started_at, completed_at),
            StepState::Failed {
                started_at,
                failed_at,
                ..
            } => (started_at, failed_at),
            _ => return None,
        };
        Some((*end - *start).num_milliseconds().max(0) as u64)
    }
}
