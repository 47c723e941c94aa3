//! Job instance context - variables and step outputs shared across steps

use crate::core::job::JobInstance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution context for one job instance
///
/// Holds environment variables, the matrix assignment and outputs published
/// by completed steps. It is created per instance and never shared with
/// sibling instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    /// Instance display name
    pub instance: String,

    /// Environment variables (workflow, then job, then provisioning)
    pub env: HashMap<String, String>,

    /// Matrix assignment for this instance
    pub matrix: HashMap<String, String>,

    /// Runtime descriptor values (`version`, `platform`)
    pub runtime: HashMap<String, String>,

    /// Outputs from completed steps (step_id -> name -> value)
    pub step_outputs: HashMap<String, HashMap<String, String>>,

    /// The current step being executed (if any)
    pub current_step_id: Option<String>,
}

impl JobContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for an instance on top of workflow-level variables
    pub fn for_instance<'a>(
        instance: &JobInstance,
        workflow_env: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.instance = instance.name.clone();

        for (k, v) in workflow_env {
            ctx.env.insert(k.clone(), v.clone());
        }
        for (k, v) in &instance.env {
            ctx.env.insert(k.clone(), v.clone());
        }

        ctx.matrix = instance.matrix.iter().cloned().collect();

        if let Some(version) = &instance.runtime.version {
            ctx.runtime.insert("version".to_string(), version.clone());
        }
        if let Some(platform) = &instance.runtime.platform {
            ctx.runtime.insert("platform".to_string(), platform.clone());
        }
        ctx.runtime
            .insert("job".to_string(), instance.job_name.clone());

        ctx
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Get a variable
    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.env.get(key)
    }

    /// Record outputs published by a step
    pub fn set_step_outputs(&mut self, step_id: &str, outputs: HashMap<String, String>) {
        self.step_outputs.insert(step_id.to_string(), outputs);
    }

    /// Get one output of a step
    pub fn get_step_output(&self, step_id: &str, name: &str) -> Option<&String> {
        self.step_outputs.get(step_id).and_then(|o| o.get(name))
    }

    /// Get all variables available for template rendering
    pub fn get_rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        for (key, value) in &self.env {
            vars.insert(format!("env.{}", key), value.clone());
        }
        for (axis, value) in &self.matrix {
            vars.insert(format!("matrix.{}", axis), value.clone());
        }
        for (key, value) in &self.runtime {
            if key == "job" {
                vars.insert("job.name".to_string(), value.clone());
            } else {
                vars.insert(format!("runtime.{}", key), value.clone());
            }
        }
        for (step_id, outputs) in &self.step_outputs {
            for (name, value) in outputs {
                vars.insert(format!("steps.{}.outputs.{}", step_id, name), value.clone());
            }
        }

        vars
    }
}
