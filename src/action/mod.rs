//! Action capability: named steps implemented in-process

pub mod builtin;
pub mod response;

use crate::core::job::RuntimeSpec;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

pub use response::{ActionError, ActionOutcome};

/// What an action can see of the job instance it runs in
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    /// Job instance display name
    pub instance: &'a str,

    /// Working directory shared by the instance's steps
    pub workspace: &'a Path,

    /// Source tree the run was started from
    pub source_dir: Option<&'a Path>,

    /// Runtime the instance was provisioned with
    pub runtime: &'a RuntimeSpec,

    /// Instance environment variables
    pub env: &'a HashMap<String, String>,
}

/// Trait for action execution - allows for different implementations
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action with its rendered `with` parameters
    async fn run(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Actions addressable by the name used in a step's `uses`
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `checkout`, `setup-runtime` and `set-output`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("checkout", builtin::Checkout);
        registry.register("setup-runtime", builtin::SetupRuntime);
        registry.register("set-output", builtin::SetOutput);
        registry
    }

    /// Register an action, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, action: impl Action + 'static) {
        self.actions.insert(name.into(), Arc::new(action));
    }

    /// Look up an action by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
