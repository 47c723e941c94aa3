//! Matrix axes and cross-product expansion

use crate::core::error::FlowError;
use serde::{Deserialize, Serialize};

/// One matrix dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered axis assignment for one job instance
pub type Combination = Vec<(String, String)>;

/// A job's matrix: ordered axes plus exclusion entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    pub axes: Vec<MatrixAxis>,

    /// Partial assignments; a combination matching every pair is dropped
    #[serde(default)]
    pub exclude: Vec<Combination>,
}

impl Matrix {
    pub fn new(axes: Vec<MatrixAxis>) -> Self {
        Self {
            axes,
            exclude: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Cross product in declaration order, first axis varying slowest.
    ///
    /// An empty matrix yields exactly one (empty) combination. Exclusions that
    /// remove every combination are an error.
    pub fn combinations(&self, job: &str) -> Result<Vec<Combination>, FlowError> {
        let mut combos: Vec<Combination> = vec![Vec::new()];

        for axis in &self.axes {
            if axis.values.is_empty() {
                return Err(FlowError::EmptyMatrixAxis {
                    job: job.to_string(),
                    axis: axis.name.clone(),
                });
            }

            let mut next = Vec::with_capacity(combos.len() * axis.values.len());
            for combo in &combos {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.push((axis.name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos.retain(|combo| !self.is_excluded(combo));
        if combos.is_empty() {
            return Err(FlowError::NoInstances {
                job: job.to_string(),
            });
        }
        Ok(combos)
    }

    fn is_excluded(&self, combo: &Combination) -> bool {
        self.exclude.iter().any(|rule| {
            rule.iter()
                .all(|(key, value)| combo.iter().any(|(k, v)| k == key && v == value))
        })
    }
}

/// Human label for a combination, e.g. `3.6, linux`
pub fn describe(combo: &Combination) -> String {
    combo
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
