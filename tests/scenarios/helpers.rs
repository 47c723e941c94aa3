//! Test utility functions for flowline scenarios

use async_trait::async_trait;
use flowline::action::{Action, ActionContext, ActionError, ActionOutcome, ActionRegistry};
use flowline::core::config::WorkflowConfig;
use flowline::core::{ExecutionStatus, StepStatus, Workflow};
use flowline::execution::{
    CancelToken, EngineOptions, ExecutionEngine, ExecutionEvent, InstanceReport,
    LocalProvisioner, ProvisionCache, RunReport, StepReport,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Parameters an action received, keyed by instance name
pub type Calls = Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>;

/// Action that records the rendered parameters it was called with
#[derive(Clone, Default)]
pub struct RecordingAction {
    pub calls: Calls,
}

#[async_trait]
impl Action for RecordingAction {
    async fn run(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.instance.to_string(), params.clone()));
        Ok(ActionOutcome::ok("recorded"))
    }
}

/// Engine wired to a throwaway provisioning cache and source tree
pub struct TestHarness {
    pub engine: ExecutionEngine,
    pub cache: Arc<ProvisionCache>,
    pub source: TempDir,
    pub recorder: RecordingAction,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
    _cache_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let cache = Arc::new(ProvisionCache::new(cache_dir.path()));
        let provisioner =
            Arc::new(LocalProvisioner::new(cache.clone()).with_source_dir(source.path()));

        let recorder = RecordingAction::default();
        let mut actions = ActionRegistry::with_builtins();
        actions.register("record", recorder.clone());

        let options = EngineOptions {
            source_dir: Some(source.path().to_path_buf()),
            grace_period: Duration::from_millis(200),
            ..options
        };
        let engine = ExecutionEngine::new(provisioner, actions, options);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            engine,
            cache,
            source,
            recorder,
            events,
            _cache_dir: cache_dir,
        }
    }

    /// Run a workflow given as YAML, ignoring its triggers
    pub async fn run(&self, yaml: &str) -> RunReport {
        self.engine
            .run_workflow(&workflow(yaml), None, &CancelToken::never())
            .await
    }

    /// Parameters recorded by the `record` action, in call order
    pub fn recorded(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.recorder.calls.lock().unwrap().clone()
    }
}

/// Parse a workflow from YAML
pub fn workflow(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml)
        .expect("valid workflow yaml")
        .to_workflow()
        .expect("convertible workflow")
}

/// Find an instance report by its display name
pub fn instance<'a>(report: &'a RunReport, name: &str) -> &'a InstanceReport {
    report
        .instances()
        .find(|i| i.name == name)
        .unwrap_or_else(|| {
            let names: Vec<_> = report.instances().map(|i| i.name.as_str()).collect();
            panic!("Instance '{}' not found; have {:?}", name, names)
        })
}

/// Find a step report by id
pub fn step<'a>(instance: &'a InstanceReport, id: &str) -> &'a StepReport {
    instance
        .steps
        .iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("Step '{}' not found in {}", id, instance.name))
}

/// Assert the statuses of an instance's steps, in order
pub fn assert_steps(instance: &InstanceReport, expected: &[(&str, StepStatus)]) {
    let actual: Vec<(&str, StepStatus)> = instance
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.status))
        .collect();
    assert_eq!(
        actual, expected,
        "Unexpected step statuses for {}",
        instance.name
    );
}

/// Assert the run finished with the given status
pub fn assert_run_status(report: &RunReport, expected: ExecutionStatus) {
    assert_eq!(
        report.status,
        expected,
        "Run of {} finished {:?}; failures: {:?}",
        report.workflow,
        report.status,
        report
            .failures()
            .iter()
            .map(|f| f.error.to_string())
            .collect::<Vec<_>>()
    );
}
