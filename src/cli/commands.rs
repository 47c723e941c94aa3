//! CLI command definitions

use crate::core::{Event, EventKind};
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run workflows
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file (repeatable)
    #[arg(short, long, required = true, num_args = 1..)]
    pub file: Vec<PathBuf>,

    /// Event kind; only workflows triggered by it run
    #[arg(long, value_enum, requires = "branch")]
    pub event: Option<EventKindArg>,

    /// Branch the event targets
    #[arg(long)]
    pub branch: Option<String>,

    /// Workflow variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Scheduling strategy for job instances
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency cap for `parallel-limited`
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Source tree for `checkout` and dependency manifests (default: current dir)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Provisioning cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Default step timeout in seconds
    #[arg(long)]
    pub step_timeout: Option<u64>,

    /// Default job instance timeout in seconds
    #[arg(long)]
    pub job_timeout: Option<u64>,

    /// Write the run reports as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the run reports as JSON instead of the summary
    #[arg(long)]
    pub json: bool,

    /// Print each step's captured output as it finishes
    #[arg(short, long)]
    pub stream: bool,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }

    /// The event to resolve workflows against, if one was given
    pub fn trigger_event(&self) -> Option<Event> {
        match (self.event, &self.branch) {
            (Some(kind), Some(branch)) => Some(Event::new(kind.into(), branch.clone())),
            _ => None,
        }
    }
}

/// Validate a workflow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the job instances a workflow expands into
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Event kind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventKindArg {
    Push,
    #[value(name = "pull_request", alias = "pull-request")]
    PullRequest,
}

impl From<EventKindArg> for EventKind {
    fn from(arg: EventKindArg) -> Self {
        match arg {
            EventKindArg::Push => EventKind::Push,
            EventKindArg::PullRequest => EventKind::PullRequest,
        }
    }
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[value(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
