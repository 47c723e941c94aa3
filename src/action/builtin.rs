//! Built-in actions

use crate::action::{Action, ActionContext, ActionError, ActionOutcome};
use crate::execution::provision::{copy_dir_until, StopOnDrop};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Directories never copied into a workspace
const CHECKOUT_EXCLUDES: &[&str] = &[".git", "target"];

/// Copy the source tree into the workspace
///
/// Parameters: `path` (optional) - subdirectory of the workspace to copy into.
/// Outputs: `path` - absolute destination.
#[derive(Debug, Clone, Copy)]
pub struct Checkout;

#[async_trait]
impl Action for Checkout {
    async fn run(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let source = ctx
            .source_dir
            .ok_or_else(|| ActionError::Failed("no source directory configured".to_string()))?
            .to_path_buf();

        let dest = match params.get("path").filter(|p| !p.is_empty()) {
            Some(rel) => ctx.workspace.join(relative_path(rel)?),
            None => ctx.workspace.to_path_buf(),
        };

        debug!("Checking out {} into {}", source.display(), dest.display());

        // Stops the copy if this future is dropped on timeout or cancellation
        let stop = StopOnDrop::new();
        let flag = stop.flag();
        let target = dest.clone();
        let copied = tokio::task::spawn_blocking(move || {
            copy_dir_until(&source, &target, CHECKOUT_EXCLUDES, &flag)
        })
        .await
        .map_err(|e| ActionError::Failed(format!("checkout task failed: {}", e)))??;

        Ok(
            ActionOutcome::ok(format!("checked out {} files into {}", copied, dest.display()))
                .with_output("path", dest.display().to_string()),
        )
    }
}

fn relative_path(value: &str) -> Result<PathBuf, ActionError> {
    let path = Path::new(value);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ActionError::InvalidParameter {
            name: "path".to_string(),
            reason: format!("'{}' must stay inside the workspace", value),
        });
    }
    Ok(path.to_path_buf())
}

/// Confirm the provisioned runtime
///
/// Parameters: `version` (optional) - version the step expects.
/// Outputs: `version`, `platform`.
#[derive(Debug, Clone, Copy)]
pub struct SetupRuntime;

#[async_trait]
impl Action for SetupRuntime {
    async fn run(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let requested = params.get("version").filter(|v| !v.is_empty());
        let provisioned = ctx.runtime.version.as_ref();

        let version = match (requested, provisioned) {
            (Some(want), Some(have)) if want != have => {
                return Ok(ActionOutcome::failed(format!(
                    "requested runtime {} but {} was provisioned",
                    want, have
                )));
            }
            (_, Some(have)) => have.clone(),
            (Some(want), None) => want.clone(),
            (None, None) => String::new(),
        };

        let platform = ctx
            .runtime
            .platform
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string());

        let log = if version.is_empty() {
            format!("using default runtime on {}", platform)
        } else {
            format!("using runtime {} on {}", version, platform)
        };

        Ok(ActionOutcome::ok(log)
            .with_output("version", version)
            .with_output("platform", platform))
    }
}

/// Publish every parameter as an output
#[derive(Debug, Clone, Copy)]
pub struct SetOutput;

#[async_trait]
impl Action for SetOutput {
    async fn run(
        &self,
        params: &BTreeMap<String, String>,
        _ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let mut outcome = ActionOutcome::ok(format!("set {} outputs", params.len()));
        for (name, value) in params {
            outcome = outcome.with_output(name.clone(), value.clone());
        }
        Ok(outcome)
    }
}
