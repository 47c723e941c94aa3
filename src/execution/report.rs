//! Run reports and the overall pass/fail signal

use crate::core::{
    matrix::Combination, Event, ExecutionStatus, FailureReason, FlowError, Step, StepState,
    StepStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of one step of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: String,
    pub name: String,
    pub status: StepStatus,

    /// Why the step did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,

    /// Step timeout in seconds
    pub timeout_secs: u64,

    /// Deadline of the enclosing job instance in seconds, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,

    /// Failure recorded without failing the instance
    pub continue_on_error: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,
}

impl StepReport {
    pub fn from_step(step: &Step, outputs: Option<&HashMap<String, String>>) -> Self {
        let failure = match &step.state {
            StepState::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        };

        Self {
            id: step.id.clone(),
            name: step.name.clone(),
            status: step.state.status(),
            reason: step.state.reason(),
            failure,
            timeout_secs: step.timeout_secs,
            job_timeout_secs: None,
            continue_on_error: step.continue_on_error,
            duration_ms: step.state.duration_ms(),
            output: step.state.output().map(str::to_string),
            outputs: outputs.cloned().unwrap_or_default(),
        }
    }

    pub fn with_job_timeout(mut self, secs: Option<u64>) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// The error this step contributes to the run, if any
    pub fn error(&self) -> Option<FlowError> {
        match (&self.status, &self.failure, self.job_timeout_secs) {
            (StepStatus::Failure, Some(FailureReason::JobTimeout), Some(secs)) => {
                Some(FlowError::JobTimeout {
                    step: self.id.clone(),
                    secs,
                })
            }
            (StepStatus::Failure, Some(FailureReason::Timeout), _) => Some(FlowError::Timeout {
                step: self.id.clone(),
                secs: self.timeout_secs,
            }),
            (StepStatus::Failure, reason, _) => Some(FlowError::StepFailure {
                step: self.id.clone(),
                reason: reason
                    .as_ref()
                    .map(|r| r.to_string())
                    .or_else(|| self.reason.clone())
                    .unwrap_or_else(|| "failed".to_string()),
            }),
            (StepStatus::Cancelled, _, _) => Some(FlowError::Cancelled),
            _ => None,
        }
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    /// Display name, `job` or `job (v1, v2)`
    pub name: String,
    pub job: String,
    pub matrix: Combination,
    pub status: ExecutionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
}

/// Outcome of one declared job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,

    /// Matrix expansion error; no instances ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Instances in expansion order
    pub instances: Vec<InstanceReport>,
}

impl JobReport {
    pub fn status(&self) -> ExecutionStatus {
        if self.error.is_some() {
            return ExecutionStatus::Failure;
        }
        aggregate(self.instances.iter().map(|i| i.status))
    }
}

/// Outcome of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,

    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Jobs in declaration order
    pub jobs: Vec<JobReport>,
}

/// One thing that went wrong in a run
#[derive(Debug, Clone)]
pub struct Failure {
    pub job: String,
    pub instance: Option<String>,
    pub step: Option<String>,
    pub error: FlowError,
    pub output: Option<String>,

    /// Recorded under `continue_on_error`; does not fail the run
    pub tolerated: bool,
}

impl RunReport {
    /// Overall status derived from the job reports
    pub fn compute_status(jobs: &[JobReport]) -> ExecutionStatus {
        aggregate(jobs.iter().map(JobReport::status))
    }

    /// The single gating signal
    pub fn passed(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceReport> {
        self.jobs.iter().flat_map(|j| j.instances.iter())
    }

    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Every failing job, instance and step, in report order
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = Vec::new();

        for job in &self.jobs {
            if let Some(error) = &job.error {
                failures.push(Failure {
                    job: job.name.clone(),
                    instance: None,
                    step: None,
                    error: FlowError::StepFailure {
                        step: job.name.clone(),
                        reason: error.clone(),
                    },
                    output: None,
                    tolerated: false,
                });
            }

            for instance in &job.instances {
                if let Some(message) = &instance.provisioning_error {
                    failures.push(Failure {
                        job: job.name.clone(),
                        instance: Some(instance.name.clone()),
                        step: None,
                        error: FlowError::Provisioning {
                            instance: instance.name.clone(),
                            message: message.clone(),
                        },
                        output: None,
                        tolerated: false,
                    });
                }

                for step in &instance.steps {
                    if step.status != StepStatus::Failure {
                        continue;
                    }
                    if let Some(error) = step.error() {
                        failures.push(Failure {
                            job: job.name.clone(),
                            instance: Some(instance.name.clone()),
                            step: Some(step.id.clone()),
                            error,
                            output: step.output.clone(),
                            tolerated: step.continue_on_error,
                        });
                    }
                }
            }
        }

        failures
    }
}

/// failure > cancelled > success; pending/running only when nothing finished
fn aggregate(statuses: impl Iterator<Item = ExecutionStatus>) -> ExecutionStatus {
    let mut any_cancelled = false;
    let mut any_unfinished = false;

    for status in statuses {
        match status {
            ExecutionStatus::Failure => return ExecutionStatus::Failure,
            ExecutionStatus::Cancelled => any_cancelled = true,
            ExecutionStatus::Pending | ExecutionStatus::Running => any_unfinished = true,
            ExecutionStatus::Success => {}
        }
    }

    if any_cancelled {
        ExecutionStatus::Cancelled
    } else if any_unfinished {
        ExecutionStatus::Running
    } else {
        ExecutionStatus::Success
    }
}
