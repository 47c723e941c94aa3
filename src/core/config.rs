//! Workflow configuration from YAML

use crate::core::{
    job::{DependencySpec, Job, RuntimeSpec},
    matrix::{Combination, Matrix, MatrixAxis},
    state::StepState,
    step::{Step, StepDefaults, StepKind},
    trigger::Trigger,
    workflow::Workflow,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Key inside `matrix:` holding exclusion entries rather than an axis
const EXCLUDE_KEY: &str = "exclude";

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Trigger rules
    #[serde(default, rename = "on")]
    pub triggers: Vec<Trigger>,

    /// Variables available to all jobs
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Defaults for steps and jobs
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Jobs, in declaration order
    #[serde(deserialize_with = "ordered_jobs")]
    pub jobs: Vec<JobConfig>,
}

/// Workflow-wide defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Default deadline for a whole job instance (in seconds)
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name (the mapping key)
    #[serde(default, skip_deserializing)]
    pub name: String,

    /// Target runtime
    #[serde(default)]
    pub runtime: RuntimeSpec,

    /// Matrix axes (name -> values) plus an optional `exclude` list
    #[serde(default)]
    pub matrix: Option<Mapping>,

    /// Dependency set to provision
    #[serde(default)]
    pub dependencies: DependencySpec,

    /// Job-level variables
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Ordered steps
    pub steps: Vec<StepConfig>,

    /// Deadline for each instance of this job (overrides defaults)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier (defaults to `step-<n>`)
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Action reference
    #[serde(default)]
    pub uses: Option<String>,

    /// Action parameters
    #[serde(default)]
    pub with: BTreeMap<String, Value>,

    /// Inline commands
    #[serde(default)]
    pub run: Option<RunConfig>,

    /// Record failure without failing the job
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    /// Run even after an earlier failure
    #[serde(default)]
    pub always: bool,

    /// Timeout for this step (overrides defaults)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Step-level variables
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
}

/// `run:` accepts one script or a list of commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunConfig {
    Script(String),
    Commands(Vec<String>),
}

impl RunConfig {
    fn lines(&self) -> Vec<String> {
        match self {
            RunConfig::Script(s) => vec![s.clone()],
            RunConfig::Commands(c) => c.clone(),
        }
    }
}

fn ordered_jobs<'de, D>(deserializer: D) -> std::result::Result<Vec<JobConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Mapping::deserialize(deserializer)?;
    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = key
                .as_str()
                .ok_or_else(|| serde::de::Error::custom("job names must be strings"))?
                .to_string();
            let mut job: JobConfig = serde_yaml::from_value(value)
                .map_err(|e| serde::de::Error::custom(format!("job '{}': {}", name, e)))?;
            job.name = name;
            Ok(job)
        })
        .collect()
}

/// Render a YAML scalar as a string
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar_map(map: &BTreeMap<String, Value>, what: &str) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| {
            scalar(v)
                .map(|s| (k.clone(), s))
                .ok_or_else(|| anyhow::anyhow!("{} '{}' must be a scalar value", what, k))
        })
        .collect()
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid workflow file {}", path.display()))
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Workflow name must not be empty");
        }
        if self.jobs.is_empty() {
            anyhow::bail!("Workflow '{}' has no jobs", self.name);
        }

        scalar_map(&self.env, "Workflow variable")?;

        for job in &self.jobs {
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job.name);
            }

            scalar_map(&job.env, "Job variable")
                .with_context(|| format!("Job '{}'", job.name))?;
            job.parse_matrix()?;

            let mut seen_ids = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                let id = step.resolved_id(index);
                if !seen_ids.insert(id.clone()) {
                    anyhow::bail!("Job '{}' has duplicate step ID: {}", job.name, id);
                }

                match (&step.uses, &step.run) {
                    (Some(_), Some(_)) => anyhow::bail!(
                        "Step '{}' in job '{}' has both 'uses' and 'run'",
                        id,
                        job.name
                    ),
                    (None, None) => anyhow::bail!(
                        "Step '{}' in job '{}' needs either 'uses' or 'run'",
                        id,
                        job.name
                    ),
                    _ => {}
                }

                if let Some(RunConfig::Commands(commands)) = &step.run {
                    if commands.is_empty() {
                        anyhow::bail!("Step '{}' in job '{}' has an empty 'run' list", id, job.name);
                    }
                }

                if step.uses.is_none() && !step.with.is_empty() {
                    anyhow::bail!(
                        "Step '{}' in job '{}' sets 'with' but is not an action step",
                        id,
                        job.name
                    );
                }

                scalar_map(&step.with, "Parameter")
                    .with_context(|| format!("Step '{}' in job '{}'", id, job.name))?;
                scalar_map(&step.env, "Step variable")
                    .with_context(|| format!("Step '{}' in job '{}'", id, job.name))?;
            }
        }

        Ok(())
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow> {
        self.to_workflow_with(&StepDefaults::default())
    }

    /// Convert config, falling back to `base` where the file sets no default
    pub fn to_workflow_with(&self, base: &StepDefaults) -> Result<Workflow> {
        let defaults = StepDefaults {
            timeout_secs: self.defaults.step_timeout_secs.unwrap_or(base.timeout_secs),
        };

        let jobs = self
            .jobs
            .iter()
            .map(|job| job.to_job(&defaults, self.defaults.job_timeout_secs))
            .collect::<Result<Vec<_>>>()?;

        Ok(Workflow {
            name: self.name.clone(),
            triggers: self.triggers.clone(),
            env: scalar_map(&self.env, "Workflow variable")?,
            jobs,
        })
    }
}

impl JobConfig {
    /// Parse the raw matrix mapping, preserving axis and value order
    pub fn parse_matrix(&self) -> Result<Matrix> {
        let Some(raw) = &self.matrix else {
            return Ok(Matrix::default());
        };

        let mut matrix = Matrix::default();
        let mut exclusions = None;

        for (key, value) in raw {
            let name = key
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Job '{}': matrix keys must be strings", self.name))?;

            if name == EXCLUDE_KEY {
                exclusions = Some(value);
                continue;
            }

            let values = value.as_sequence().ok_or_else(|| {
                anyhow::anyhow!("Job '{}': matrix axis '{}' must be a list", self.name, name)
            })?;
            let values = values
                .iter()
                .map(|v| {
                    scalar(v).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Job '{}': matrix axis '{}' values must be scalars",
                            self.name,
                            name
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            matrix.axes.push(MatrixAxis {
                name: name.to_string(),
                values,
            });
        }

        if let Some(exclusions) = exclusions {
            matrix.exclude = self.parse_exclusions(exclusions, &matrix)?;
        }

        Ok(matrix)
    }

    fn parse_exclusions(&self, value: &Value, matrix: &Matrix) -> Result<Vec<Combination>> {
        let entries = value.as_sequence().ok_or_else(|| {
            anyhow::anyhow!("Job '{}': matrix exclude must be a list", self.name)
        })?;

        entries
            .iter()
            .map(|entry| {
                let entry = entry.as_mapping().ok_or_else(|| {
                    anyhow::anyhow!("Job '{}': matrix exclude entries must be mappings", self.name)
                })?;
                // An empty entry would match every combination
                if entry.is_empty() {
                    anyhow::bail!("Job '{}': matrix exclude entries must not be empty", self.name);
                }
                entry
                    .iter()
                    .map(|(k, v)| {
                        let axis = k.as_str().unwrap_or_default();
                        if !matrix.axes.iter().any(|a| a.name == axis) {
                            anyhow::bail!(
                                "Job '{}': matrix exclude references unknown axis '{}'",
                                self.name,
                                axis
                            );
                        }
                        let value = scalar(v).ok_or_else(|| {
                            anyhow::anyhow!("Job '{}': matrix exclude values must be scalars", self.name)
                        })?;
                        Ok((axis.to_string(), value))
                    })
                    .collect()
            })
            .collect()
    }

    fn to_job(&self, defaults: &StepDefaults, default_job_timeout: Option<u64>) -> Result<Job> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| step.to_step(index, defaults))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Job '{}'", self.name))?;

        Ok(Job {
            name: self.name.clone(),
            runtime: self.runtime.clone(),
            matrix: self.parse_matrix()?,
            dependencies: self.dependencies.clone(),
            env: scalar_map(&self.env, "Job variable")?,
            steps,
            timeout_secs: self.timeout_secs.or(default_job_timeout),
        })
    }
}

impl StepConfig {
    fn resolved_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("step-{}", index + 1))
    }

    fn to_step(&self, index: usize, defaults: &StepDefaults) -> Result<Step> {
        let id = self.resolved_id(index);

        let kind = match (&self.uses, &self.run) {
            (Some(uses), None) => StepKind::Action {
                uses: uses.clone(),
                with: scalar_map(&self.with, "Parameter")?,
            },
            (None, Some(run)) => StepKind::Command { run: run.lines() },
            _ => anyhow::bail!("Step '{}' needs exactly one of 'uses' or 'run'", id),
        };

        let name = self.name.clone().unwrap_or_else(|| match &kind {
            StepKind::Action { uses, .. } => uses.clone(),
            StepKind::Command { run } => run
                .first()
                .and_then(|l| l.lines().next())
                .unwrap_or_default()
                .to_string(),
        });

        Ok(Step {
            id,
            name,
            kind,
            continue_on_error: self.continue_on_error,
            always: self.always,
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            env: scalar_map(&self.env, "Step variable")?,
            state: StepState::Pending,
        })
    }
}
