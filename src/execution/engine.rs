//! Main execution engine - orchestrates a workflow run

use crate::{
    action::ActionRegistry,
    core::{
        workflow::resolve_workflows, Event, ExecutionStatus, FailureReason, JobContext,
        JobInstance, StepState, Workflow,
    },
    execution::{
        cancel::{CancelToken, RunCoordinator},
        executor::{ExecutionResult, StepExecutor},
        provision::{ProvisionError, Provisioner},
        report::{InstanceReport, JobReport, RunReport, StepReport},
        scheduler::{JobScheduler, SchedulingStrategy},
    },
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

const SKIPPED_AFTER_FAILURE: &str = "skipped due to prior failure";

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
    },
    JobExpansionFailed {
        job: String,
        error: String,
    },
    InstanceStarted {
        instance: String,
    },
    InstanceProvisioned {
        instance: String,
        cache_key: Option<String>,
    },
    ProvisioningFailed {
        instance: String,
        error: String,
    },
    StepStarted {
        instance: String,
        step_id: String,
        name: String,
    },
    StepOutput {
        instance: String,
        step_id: String,
        output: String,
    },
    StepCompleted {
        instance: String,
        step_id: String,
    },
    StepFailed {
        instance: String,
        step_id: String,
        reason: FailureReason,
        continue_on_error: bool,
    },
    StepSkipped {
        instance: String,
        step_id: String,
        reason: String,
    },
    StepCancelled {
        instance: String,
        step_id: String,
    },
    InstanceCompleted {
        instance: String,
        status: ExecutionStatus,
    },
    RunCompleted {
        run_id: Uuid,
        workflow: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strategy: SchedulingStrategy,

    /// Instance deadline for jobs that do not set one
    pub default_job_timeout: Option<Duration>,

    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,

    /// Per-stream capture cap for command output
    pub max_output_bytes: usize,

    /// Source tree for `checkout`
    pub source_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::default(),
            default_job_timeout: None,
            grace_period: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
            source_dir: None,
        }
    }
}

/// Why the remaining steps of an instance will not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    JobTimeout,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Cancelled => write!(f, "run cancelled"),
            Halt::JobTimeout => write!(f, "job timed out"),
        }
    }
}

struct EngineInner {
    provisioner: Arc<dyn Provisioner>,
    executor: StepExecutor,
    options: EngineOptions,
    coordinator: RunCoordinator,
    event_handlers: Mutex<Vec<EventHandler>>,
}

/// Main workflow execution engine
///
/// Cheap to clone; clones share handlers and the run coordinator.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        actions: ActionRegistry,
        options: EngineOptions,
    ) -> Self {
        let executor = StepExecutor::new(actions)
            .with_source_dir(options.source_dir.clone())
            .with_grace_period(options.grace_period)
            .with_max_output_bytes(options.max_output_bytes);

        Self {
            inner: Arc::new(EngineInner {
                provisioner,
                executor,
                options,
                coordinator: RunCoordinator::new(),
                event_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Run every workflow the event triggers, in input order.
    ///
    /// A newer call for the same workflow and branch cancels a run still in
    /// flight. No matching workflow yields an empty list.
    pub async fn run_event(
        &self,
        workflows: &[Workflow],
        event: &Event,
        cancel: &CancelToken,
    ) -> Vec<RunReport> {
        let selected = resolve_workflows(workflows, event);
        if selected.is_empty() {
            info!("No workflow triggered by {}", event);
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(selected.len());
        for workflow in selected {
            let ticket = self.inner.coordinator.begin(&workflow.name, &event.branch);

            let forward = {
                let external = cancel.clone();
                let handle = ticket.handle().clone();
                tokio::spawn(async move {
                    external.cancelled().await;
                    handle.cancel();
                })
            };

            let report = self
                .run_workflow(workflow, Some(event), &ticket.token())
                .await;
            forward.abort();
            reports.push(report);
        }
        reports
    }

    /// Execute one workflow: expand every job, run every instance, report
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        event: Option<&Event>,
        cancel: &CancelToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!("Starting workflow run: {} ({})", workflow.name, run_id);
        self.inner.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
        });

        let workflow_env = Arc::new(workflow.env.clone());
        let scheduler = JobScheduler::new(self.inner.options.strategy);
        let mut jobs: Vec<JobReport> = Vec::with_capacity(workflow.jobs.len());
        let mut slots: Vec<Vec<Option<InstanceReport>>> = Vec::with_capacity(workflow.jobs.len());
        let mut pending: Vec<(usize, usize, JobInstance)> = Vec::new();

        for (job_index, job) in workflow.jobs.iter().enumerate() {
            match job.expand() {
                Ok(instances) => {
                    info!("Job {} expanded into {} instance(s)", job.name, instances.len());
                    slots.push(vec![None; instances.len()]);
                    for (index, instance) in instances.into_iter().enumerate() {
                        pending.push((job_index, index, instance));
                    }
                    jobs.push(JobReport {
                        name: job.name.clone(),
                        error: None,
                        instances: Vec::new(),
                    });
                }
                Err(e) => {
                    error!("Job {} failed to expand: {}", job.name, e);
                    self.inner.emit(ExecutionEvent::JobExpansionFailed {
                        job: job.name.clone(),
                        error: e.to_string(),
                    });
                    slots.push(Vec::new());
                    jobs.push(JobReport {
                        name: job.name.clone(),
                        error: Some(e.to_string()),
                        instances: Vec::new(),
                    });
                }
            }
        }

        let fallback: Vec<(usize, usize, InstanceReport)> = pending
            .iter()
            .map(|(job_index, index, instance)| (*job_index, *index, aborted_report(instance)))
            .collect();

        let mut tasks = JoinSet::new();
        for (job_index, index, instance) in pending {
            let permit = scheduler.acquire().await;
            let inner = self.inner.clone();
            let env = workflow_env.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let report = inner.run_instance(instance, &env, &cancel).await;
                (job_index, index, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((job_index, index, report)) => slots[job_index][index] = Some(report),
                Err(e) => error!("Instance task failed: {}", e),
            }
        }

        for (job_index, index, report) in fallback {
            let slot = &mut slots[job_index][index];
            if slot.is_none() {
                *slot = Some(report);
            }
        }
        for (job, instances) in jobs.iter_mut().zip(slots) {
            job.instances = instances.into_iter().flatten().collect();
        }

        let status = RunReport::compute_status(&jobs);
        info!("Workflow run finished: {} - {}", workflow.name, status);
        self.inner.emit(ExecutionEvent::RunCompleted {
            run_id,
            workflow: workflow.name.clone(),
            status,
        });

        RunReport {
            run_id,
            workflow: workflow.name.clone(),
            event: event.cloned(),
            status,
            started_at,
            completed_at: Utc::now(),
            jobs,
        }
    }
}

/// Report used when an instance task dies without producing one
fn aborted_report(instance: &JobInstance) -> InstanceReport {
    let now = Utc::now();
    let steps = instance
        .steps
        .iter()
        .map(|step| {
            let mut step = step.clone();
            step.state = StepState::Skipped {
                reason: "instance task aborted".to_string(),
            };
            StepReport::from_step(&step, None)
        })
        .collect();

    InstanceReport {
        name: instance.name.clone(),
        job: instance.job_name.clone(),
        matrix: instance.matrix.clone(),
        status: ExecutionStatus::Failure,
        provisioning_error: Some("instance task aborted".to_string()),
        cache_key: None,
        started_at: now,
        completed_at: now,
        duration_ms: 0,
        steps,
    }
}

impl EngineInner {
    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = self
            .event_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Provision and run one instance's steps in order
    async fn run_instance(
        &self,
        instance: JobInstance,
        workflow_env: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> InstanceReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let name = instance.name.clone();
        let mut steps = instance.steps.clone();

        info!("Starting instance: {}", name);
        self.emit(ExecutionEvent::InstanceStarted {
            instance: name.clone(),
        });

        let job_limit = instance
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.options.default_job_timeout);
        let job_timeout_secs = job_limit.map(|limit| limit.as_secs().max(1));

        let finish = |steps: &[crate::core::Step],
                      context: Option<&JobContext>,
                      status: ExecutionStatus,
                      provisioning_error: Option<String>,
                      cache_key: Option<String>| {
            let steps = steps
                .iter()
                .map(|s| {
                    StepReport::from_step(
                        s,
                        context.and_then(|c| c.step_outputs.get(&s.id)),
                    )
                    .with_job_timeout(job_timeout_secs)
                })
                .collect();
            InstanceReport {
                name: instance.name.clone(),
                job: instance.job_name.clone(),
                matrix: instance.matrix.clone(),
                status,
                provisioning_error,
                cache_key,
                started_at,
                completed_at: Utc::now(),
                duration_ms: clock.elapsed().as_millis() as u64,
                steps,
            }
        };

        let environment = if cancel.is_cancelled() {
            Err(ProvisionError::Cancelled)
        } else {
            self.provisioner.provision(&instance, cancel).await
        };

        let environment = match environment {
            Ok(environment) => environment,
            Err(ProvisionError::Cancelled) => {
                warn!("Instance {} cancelled before it started", name);
                for step in steps.iter_mut() {
                    step.state = StepState::Cancelled {
                        reason: Halt::Cancelled.to_string(),
                        output: None,
                    };
                }
                let report = finish(&steps, None, ExecutionStatus::Cancelled, None, None);
                self.emit(ExecutionEvent::InstanceCompleted {
                    instance: name,
                    status: ExecutionStatus::Cancelled,
                });
                return report;
            }
            Err(e) => {
                error!("Provisioning failed for {}: {}", name, e);
                self.emit(ExecutionEvent::ProvisioningFailed {
                    instance: name.clone(),
                    error: e.to_string(),
                });
                for step in steps.iter_mut() {
                    step.state = StepState::Skipped {
                        reason: "provisioning failed".to_string(),
                    };
                }
                let report = finish(
                    &steps,
                    None,
                    ExecutionStatus::Failure,
                    Some(e.to_string()),
                    None,
                );
                self.emit(ExecutionEvent::InstanceCompleted {
                    instance: name,
                    status: ExecutionStatus::Failure,
                });
                return report;
            }
        };

        self.emit(ExecutionEvent::InstanceProvisioned {
            instance: name.clone(),
            cache_key: environment.cache_key.clone(),
        });

        let mut context = JobContext::for_instance(&instance, workflow_env);
        for (key, value) in &environment.env {
            context.set_variable(key.clone(), value.clone());
        }

        let deadline = job_limit.map(|limit| Instant::now() + limit);

        let mut failed = false;
        let mut halt: Option<Halt> = None;

        for step in steps.iter_mut() {
            if halt.is_none() && cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
            }

            if let Some(reason) = halt {
                step.state = StepState::Cancelled {
                    reason: reason.to_string(),
                    output: None,
                };
                self.emit(ExecutionEvent::StepCancelled {
                    instance: name.clone(),
                    step_id: step.id.clone(),
                });
                continue;
            }

            if failed && !step.always {
                step.state = StepState::Skipped {
                    reason: SKIPPED_AFTER_FAILURE.to_string(),
                };
                self.emit(ExecutionEvent::StepSkipped {
                    instance: name.clone(),
                    step_id: step.id.clone(),
                    reason: SKIPPED_AFTER_FAILURE.to_string(),
                });
                continue;
            }

            let started = Utc::now();

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Instance {} reached its deadline before step {}", name, step.id);
                step.state = StepState::Failed {
                    reason: FailureReason::JobTimeout,
                    output: String::new(),
                    started_at: started,
                    failed_at: started,
                };
                self.emit(ExecutionEvent::StepFailed {
                    instance: name.clone(),
                    step_id: step.id.clone(),
                    reason: FailureReason::JobTimeout,
                    continue_on_error: step.continue_on_error,
                });
                failed = true;
                halt = Some(Halt::JobTimeout);
                continue;
            }

            context.current_step_id = Some(step.id.clone());
            step.state = StepState::Running {
                started_at: started,
            };
            self.emit(ExecutionEvent::StepStarted {
                instance: name.clone(),
                step_id: step.id.clone(),
                name: step.name.clone(),
            });

            let result = self
                .executor
                .execute(step, &context, &environment, deadline, cancel)
                .await;

            let output = match &result {
                ExecutionResult::Success { output, .. }
                | ExecutionResult::Failed { output, .. }
                | ExecutionResult::Cancelled { output } => output.clone(),
            };
            if !output.is_empty() {
                self.emit(ExecutionEvent::StepOutput {
                    instance: name.clone(),
                    step_id: step.id.clone(),
                    output,
                });
            }

            match result {
                ExecutionResult::Success { output, outputs } => {
                    context.set_step_outputs(&step.id, outputs);
                    step.state = StepState::Succeeded {
                        output,
                        started_at: started,
                        completed_at: Utc::now(),
                    };
                    self.emit(ExecutionEvent::StepCompleted {
                        instance: name.clone(),
                        step_id: step.id.clone(),
                    });
                }
                ExecutionResult::Failed { reason, output } => {
                    self.emit(ExecutionEvent::StepFailed {
                        instance: name.clone(),
                        step_id: step.id.clone(),
                        reason: reason.clone(),
                        continue_on_error: step.continue_on_error,
                    });

                    if reason == FailureReason::JobTimeout {
                        failed = true;
                        halt = Some(Halt::JobTimeout);
                    } else if step.continue_on_error {
                        info!("Step {} failed but continues on error", step.id);
                    } else {
                        failed = true;
                    }

                    step.state = StepState::Failed {
                        reason,
                        output,
                        started_at: started,
                        failed_at: Utc::now(),
                    };
                }
                ExecutionResult::Cancelled { output } => {
                    step.state = StepState::Cancelled {
                        reason: Halt::Cancelled.to_string(),
                        output: Some(output),
                    };
                    self.emit(ExecutionEvent::StepCancelled {
                        instance: name.clone(),
                        step_id: step.id.clone(),
                    });
                    halt = Some(Halt::Cancelled);
                }
            }
        }
        context.current_step_id = None;

        let status = if failed {
            ExecutionStatus::Failure
        } else if halt == Some(Halt::Cancelled) {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Success
        };

        info!("Instance {} finished: {}", name, status);
        let report = finish(
            &steps,
            Some(&context),
            status,
            None,
            environment.cache_key.clone(),
        );
        self.emit(ExecutionEvent::InstanceCompleted {
            instance: name,
            status,
        });
        report
    }
}
