//! Step executor - runs individual steps inside a provisioned environment

use crate::{
    action::{ActionContext, ActionRegistry},
    core::{template, FailureReason, JobContext, Step, StepKind},
    execution::{
        cancel::CancelToken,
        process::{run_shell, ProcessExit, ProcessLimits},
        provision::Environment,
    },
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Step completed successfully
    Success {
        output: String,
        outputs: HashMap<String, String>,
    },
    /// Step failed
    Failed {
        reason: FailureReason,
        output: String,
    },
    /// Execution was cancelled while the step ran
    Cancelled { output: String },
}

/// How long a step may run, and which limit is the binding one
#[derive(Debug, Clone, Copy)]
struct Budget {
    limit: Duration,
    job_bound: bool,
}

impl Budget {
    fn new(step: &Step, deadline: Option<Instant>) -> Self {
        let step_limit = Duration::from_secs(step.timeout_secs);
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < step_limit {
                    Budget {
                        limit: remaining,
                        job_bound: true,
                    }
                } else {
                    Budget {
                        limit: step_limit,
                        job_bound: false,
                    }
                }
            }
            None => Budget {
                limit: step_limit,
                job_bound: false,
            },
        }
    }

    fn timeout_reason(&self) -> FailureReason {
        if self.job_bound {
            FailureReason::JobTimeout
        } else {
            FailureReason::Timeout
        }
    }
}

/// Executes a single step
#[derive(Debug, Clone)]
pub struct StepExecutor {
    actions: ActionRegistry,
    source_dir: Option<PathBuf>,
    grace_period: Duration,
    max_output_bytes: usize,
}

impl StepExecutor {
    pub fn new(actions: ActionRegistry) -> Self {
        Self {
            actions,
            source_dir: None,
            grace_period: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
        }
    }

    /// Source tree handed to actions such as `checkout`
    pub fn with_source_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.source_dir = dir;
        self
    }

    /// Time between SIGTERM and SIGKILL when stopping a command
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Execute a step and return the result
    ///
    /// `deadline` is the job instance deadline, if any; the step is stopped at
    /// whichever of its own timeout or the deadline comes first.
    pub async fn execute(
        &self,
        step: &Step,
        context: &JobContext,
        environment: &Environment,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        info!("Executing step: {} ({})", step.id, step.describe());

        let budget = Budget::new(step, deadline);
        let variables = context.get_rendering_variables();

        let result = match &step.kind {
            StepKind::Command { run } => {
                self.run_commands(step, run, &variables, context, environment, budget, cancel)
                    .await
            }
            StepKind::Action { uses, with } => {
                self.run_action(uses, with, &variables, context, environment, budget, cancel)
                    .await
            }
        };

        match &result {
            ExecutionResult::Success { .. } => info!("Step {} completed successfully", step.id),
            ExecutionResult::Failed { reason, .. } => error!("Step {} failed: {}", step.id, reason),
            ExecutionResult::Cancelled { .. } => warn!("Step {} cancelled", step.id),
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_commands(
        &self,
        step: &Step,
        run: &[String],
        variables: &HashMap<String, String>,
        context: &JobContext,
        environment: &Environment,
        budget: Budget,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let mut env = context.env.clone();
        for (key, value) in &step.env {
            env.insert(key.clone(), template::render(value, variables));
        }

        let output_file = environment.output_file(&step.id);
        env.insert(
            "FLOWLINE_OUTPUT".to_string(),
            output_file.display().to_string(),
        );

        let step_deadline = Instant::now() + budget.limit;
        let mut output = String::new();

        for line in run {
            let script = template::render(line, variables);
            debug!("Running command for step {}: {}", step.id, script);

            let limits = ProcessLimits {
                timeout: step_deadline.saturating_duration_since(Instant::now()),
                grace_period: self.grace_period,
                max_output_bytes: self.max_output_bytes,
            };

            let result =
                match run_shell(&script, environment.workspace(), &env, limits, cancel).await {
                    Ok(result) => result,
                    Err(e) => {
                        return ExecutionResult::Failed {
                            reason: FailureReason::Error(format!("failed to start shell: {}", e)),
                            output,
                        }
                    }
                };
            output.push_str(&result.output);

            match result.exit {
                ProcessExit::Exited(0) => {}
                ProcessExit::Exited(code) => {
                    return ExecutionResult::Failed {
                        reason: FailureReason::ExitCode(code),
                        output,
                    }
                }
                ProcessExit::TimedOut => {
                    return ExecutionResult::Failed {
                        reason: budget.timeout_reason(),
                        output,
                    }
                }
                ProcessExit::Cancelled => return ExecutionResult::Cancelled { output },
            }
        }

        let outputs = read_outputs(&output_file).await;
        ExecutionResult::Success { output, outputs }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_action(
        &self,
        uses: &str,
        with: &BTreeMap<String, String>,
        variables: &HashMap<String, String>,
        context: &JobContext,
        environment: &Environment,
        budget: Budget,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let action = match self.actions.resolve(uses) {
            Ok(action) => action,
            Err(e) => {
                return ExecutionResult::Failed {
                    reason: FailureReason::Error(e.to_string()),
                    output: String::new(),
                }
            }
        };

        let params: BTreeMap<String, String> = with
            .iter()
            .map(|(k, v)| (k.clone(), template::render(v, variables)))
            .collect();

        let ctx = ActionContext {
            instance: &context.instance,
            workspace: environment.workspace(),
            source_dir: self.source_dir.as_deref(),
            runtime: &environment.runtime,
            env: &context.env,
        };

        tokio::select! {
            result = action.run(&params, &ctx) => match result {
                Ok(outcome) if outcome.success => ExecutionResult::Success {
                    output: outcome.log,
                    outputs: outcome.outputs,
                },
                Ok(outcome) => {
                    let message = outcome
                        .log
                        .lines()
                        .rev()
                        .find(|l| !l.trim().is_empty())
                        .unwrap_or("action reported failure")
                        .to_string();
                    ExecutionResult::Failed {
                        reason: FailureReason::Action(message),
                        output: outcome.log,
                    }
                }
                Err(e) => ExecutionResult::Failed {
                    reason: FailureReason::Error(e.to_string()),
                    output: String::new(),
                },
            },
            _ = tokio::time::sleep(budget.limit) => ExecutionResult::Failed {
                reason: budget.timeout_reason(),
                output: String::new(),
            },
            _ = cancel.cancelled() => ExecutionResult::Cancelled { output: String::new() },
        }
    }
}

/// Parse `key=value` lines a command step appended to its output file
async fn read_outputs(path: &Path) -> HashMap<String, String> {
    let Ok(contents) = tokio::fs::read_to_string(path).await else {
        return HashMap::new();
    };

    let mut outputs = HashMap::new();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                outputs.insert(key.trim().to_string(), value.to_string());
            }
            _ => warn!("Ignoring malformed output line: {}", line),
        }
    }
    outputs
}
