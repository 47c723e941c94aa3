//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Summary of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    /// Triggering event, e.g. `push on master`
    pub event: Option<String>,

    /// Run status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of job instances
    pub total_instances: usize,

    /// Number of failed job instances
    pub failed_instances: usize,

    /// One line per failure
    pub failures: Vec<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a workflow, newest first
    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>>;

    /// Most recent runs across all workflows, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// List all workflow names
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut runs: Vec<RunSummary>) -> Vec<RunSummary> {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(newest_first(
            runs.values()
                .filter(|r| r.workflow == workflow)
                .cloned()
                .collect(),
        ))
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut all = newest_first(runs.values().cloned().collect());
        all.truncate(limit);
        Ok(all)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a run report
pub fn create_summary(report: &RunReport) -> RunSummary {
    let failures = report
        .failures()
        .into_iter()
        .filter(|f| !f.tolerated)
        .map(|f| match &f.instance {
            Some(instance) => format!("{}: {}", instance, f.error),
            None => f.error.to_string(),
        })
        .collect();

    RunSummary {
        run_id: report.run_id,
        workflow: report.workflow.clone(),
        event: report.event.as_ref().map(|e| e.to_string()),
        status: report.status,
        started_at: report.started_at,
        completed_at: Some(report.completed_at),
        total_instances: report.instances().count(),
        failed_instances: report
            .instances()
            .filter(|i| i.status == ExecutionStatus::Failure)
            .count(),
        failures,
    }
}
