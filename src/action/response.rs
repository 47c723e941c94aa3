//! Action outcome and error types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error types for action operations
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    NotFound(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Result of running an action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action succeeded
    pub success: bool,

    /// Output variables visible to later steps as `steps.<id>.outputs.<name>`
    pub outputs: HashMap<String, String>,

    /// Log text captured from the action
    pub log: String,
}

impl ActionOutcome {
    /// Successful outcome with a log line and no outputs
    pub fn ok(log: impl Into<String>) -> Self {
        Self {
            success: true,
            outputs: HashMap::new(),
            log: log.into(),
        }
    }

    /// Failed outcome with the given log
    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: HashMap::new(),
            log: log.into(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}
