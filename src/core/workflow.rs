//! Workflow domain model

use crate::core::{
    job::Job,
    trigger::{Event, Trigger},
};
use std::collections::BTreeMap;

/// A named, trigger-gated collection of jobs
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,

    /// Triggers, in declaration order
    pub triggers: Vec<Trigger>,

    /// Variables visible to every job
    pub env: BTreeMap<String, String>,

    /// Jobs, in declaration order
    pub jobs: Vec<Job>,
}

impl Workflow {
    /// True iff any trigger matches the event
    pub fn matches(&self, event: &Event) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }

    /// Get a job by name
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Workflows the event triggers, in input order. Empty is the normal
/// "not applicable" outcome.
pub fn resolve_workflows<'a>(workflows: &'a [Workflow], event: &Event) -> Vec<&'a Workflow> {
    workflows.iter().filter(|w| w.matches(event)).collect()
}
