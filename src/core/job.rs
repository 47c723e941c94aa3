//! Jobs and their concrete matrix instances

use crate::core::{
    error::FlowError,
    matrix::{self, Combination, Matrix},
    step::{self, Step},
    template,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target runtime a job instance is provisioned with
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Platform label, e.g. `ubuntu-latest`, `linux`, `any`
    #[serde(default)]
    pub platform: Option<String>,

    /// Tool version, e.g. `3.6`
    #[serde(default)]
    pub version: Option<String>,
}

/// Dependency set materialized before any step runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Manifest file relative to the source directory
    #[serde(default)]
    pub manifest: Option<String>,

    /// Package names handed to the install command
    #[serde(default)]
    pub packages: Vec<String>,

    /// Shell command that installs into `$FLOWLINE_DEPS_DIR`
    #[serde(default)]
    pub install: Option<String>,
}

impl DependencySpec {
    pub fn is_empty(&self) -> bool {
        self.manifest.is_none() && self.packages.is_empty() && self.install.is_none()
    }
}

/// A job as declared in a workflow
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub runtime: RuntimeSpec,
    pub matrix: Matrix,
    pub dependencies: DependencySpec,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<Step>,
    /// Whole-instance deadline in seconds
    pub timeout_secs: Option<u64>,
}

/// One concrete combination of a job, ready to provision and run
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub job_name: String,
    /// `job` or `job (v1, v2)`
    pub name: String,
    pub matrix: Combination,
    pub runtime: RuntimeSpec,
    pub dependencies: DependencySpec,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<Step>,
    pub timeout_secs: Option<u64>,
}

impl Job {
    /// Expand the matrix into instances, in deterministic order.
    pub fn expand(&self) -> Result<Vec<JobInstance>, FlowError> {
        self.matrix
            .combinations(&self.name)?
            .into_iter()
            .map(|combo| self.instantiate(combo))
            .collect()
    }

    fn instantiate(&self, combo: Combination) -> Result<JobInstance, FlowError> {
        let err = |reference: String| FlowError::MatrixExpansion {
            job: self.name.clone(),
            reference,
        };
        let expand = |s: &str| template::expand_matrix(s, &combo).map_err(err);
        let expand_opt = |s: &Option<String>| s.as_deref().map(&expand).transpose();

        let steps = self
            .steps
            .iter()
            .map(|s| s.expand(&combo).map_err(err))
            .collect::<Result<Vec<_>, _>>()?;

        let runtime = RuntimeSpec {
            platform: expand_opt(&self.runtime.platform)?,
            version: expand_opt(&self.runtime.version)?,
        };

        let dependencies = DependencySpec {
            manifest: expand_opt(&self.dependencies.manifest)?,
            packages: self
                .dependencies
                .packages
                .iter()
                .map(|p| expand(p.as_str()))
                .collect::<Result<_, _>>()?,
            install: expand_opt(&self.dependencies.install)?,
        };

        let env = step::expand_map(&self.env, &combo).map_err(err)?;

        let name = if combo.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, matrix::describe(&combo))
        };

        Ok(JobInstance {
            job_name: self.name.clone(),
            name,
            matrix: combo,
            runtime,
            dependencies,
            env,
            steps,
            timeout_secs: self.timeout_secs,
        })
    }
}
