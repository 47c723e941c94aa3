//! Step domain model

use crate::core::{state::StepState, template};
use std::collections::BTreeMap;

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Delegate to a named external capability
    Action {
        uses: String,
        with: BTreeMap<String, String>,
    },
    /// Inline shell-like instructions, run in order
    Command { run: Vec<String> },
}

/// A single step in a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Identifier, unique within the job
    pub id: String,

    /// Display name
    pub name: String,

    pub kind: StepKind,

    /// Record a failure without failing the job
    pub continue_on_error: bool,

    /// Run even after an earlier step failed
    pub always: bool,

    /// Per-step timeout in seconds
    pub timeout_secs: u64,

    /// Step-level environment variables
    pub env: BTreeMap<String, String>,

    /// Runtime state (not serialized)
    pub state: StepState,
}

/// Defaults applied when a step does not set its own values
#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600, // 1 hour
        }
    }
}

impl Step {
    /// Short description of what the step runs, for logs and reports
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::Action { uses, .. } => format!("uses {}", uses),
            StepKind::Command { run } => match run.as_slice() {
                [single] => format!("run {}", single.lines().next().unwrap_or_default()),
                lines => format!("run {} commands", lines.len()),
            },
        }
    }

    /// Substitute matrix values into every templated field.
    ///
    /// Returns the undefined reference on failure.
    pub fn expand(&self, values: &[(String, String)]) -> Result<Step, String> {
        let kind = match &self.kind {
            StepKind::Action { uses, with } => StepKind::Action {
                uses: template::expand_matrix(uses, values)?,
                with: expand_map(with, values)?,
            },
            StepKind::Command { run } => StepKind::Command {
                run: run
                    .iter()
                    .map(|line| template::expand_matrix(line, values))
                    .collect::<Result<_, _>>()?,
            },
        };

        Ok(Step {
            id: self.id.clone(),
            name: template::expand_matrix(&self.name, values)?,
            kind,
            continue_on_error: self.continue_on_error,
            always: self.always,
            timeout_secs: self.timeout_secs,
            env: expand_map(&self.env, values)?,
            state: StepState::Pending,
        })
    }
}

pub(crate) fn expand_map(
    map: &BTreeMap<String, String>,
    values: &[(String, String)],
) -> Result<BTreeMap<String, String>, String> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), template::expand_matrix(v, values)?)))
        .collect()
}
