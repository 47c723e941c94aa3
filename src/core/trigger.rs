//! Trigger model and event matching

use glob_match::glob_match;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event that can start a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    #[serde(alias = "pull-request")]
    PullRequest,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// An incoming event (kind + target branch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub branch: String,
}

impl Event {
    pub fn new(kind: EventKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.branch)
    }
}

/// Rule deciding whether an event starts a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Event kind this trigger listens to
    #[serde(rename = "event")]
    pub kind: EventKind,

    /// Branch glob patterns; empty means every branch
    #[serde(default)]
    pub branches: Vec<String>,
}

impl Trigger {
    pub fn new(kind: EventKind, branches: Vec<String>) -> Self {
        Self { kind, branches }
    }

    /// True iff the kinds match and some pattern matches the branch
    pub fn matches(&self, event: &Event) -> bool {
        if self.kind != event.kind {
            return false;
        }
        if self.branches.is_empty() {
            return true;
        }
        self.branches
            .iter()
            .any(|pattern| branch_matches(pattern, &event.branch))
    }
}

/// Glob-match a branch name. `*` stays within one path segment, `**` spans
/// any number of segments (`releases/**` matches `releases/v1/hotfix`).
pub fn branch_matches(pattern: &str, branch: &str) -> bool {
    pattern == branch || glob_match(pattern, branch)
}
