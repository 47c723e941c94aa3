//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StepStatus},
    execution::{ExecutionEvent, InstanceReport, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar counting finished job instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Success => style("SUCCESS").green().to_string(),
        StepStatus::Failure => style("FAILURE").red().to_string(),
        StepStatus::Skipped => style("SKIPPED").dim().to_string(),
        StepStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Success => style("SUCCESS").green().to_string(),
        ExecutionStatus::Failure => style("FAILURE").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Success => CHECK,
        ExecutionStatus::Failure => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        ExecutionStatus::Pending => INFO,
    }
}

/// Format a duration in milliseconds, e.g. `850ms`, `12.3s`, `2m 5s`
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

/// Format a stored run summary for the history listing
pub fn format_run_summary(summary: &RunSummary) -> String {
    let event = summary
        .event
        .as_deref()
        .map(|e| format!(" ({})", e))
        .unwrap_or_default();

    format!(
        "{} {} - {}{} - {} - {}/{} instances failed - {}",
        status_icon(summary.status),
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.workflow).bold(),
        style(event).dim(),
        format_status(summary.status),
        summary.failed_instances,
        summary.total_instances,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

fn format_instance(instance: &InstanceReport) -> Vec<String> {
    let mut lines = vec![format!(
        "  {} {} {}",
        status_icon(instance.status),
        style(&instance.name).bold(),
        style(format_duration(instance.duration_ms)).dim()
    )];

    if let Some(error) = &instance.provisioning_error {
        lines.push(format!("      {} {}", style("provisioning:").red(), error));
    }

    for step in &instance.steps {
        let mut line = format!("      {} {}", format_step_status(step.status), step.id);
        if let Some(reason) = &step.reason {
            line.push_str(&format!(" {}", style(format!("({})", reason)).dim()));
        }
        if step.continue_on_error && step.status == StepStatus::Failure {
            line.push_str(&format!(" {}", style("[continue-on-error]").yellow()));
        }
        lines.push(line);
    }

    lines
}

/// Format a finished run: per-instance step table plus the failure list
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines = Vec::new();

    let trigger = report
        .event
        .as_ref()
        .map(|e| format!(" on {}", e))
        .unwrap_or_default();
    lines.push(format!(
        "{} Workflow {}{} {} in {}",
        status_icon(report.status),
        style(&report.workflow).bold(),
        trigger,
        format_status(report.status),
        format_duration(report.duration_ms())
    ));

    for job in &report.jobs {
        if let Some(error) = &job.error {
            lines.push(format!(
                "  {} {}: {}",
                CROSS,
                style(&job.name).bold(),
                style(error).red()
            ));
        }
        for instance in &job.instances {
            lines.extend(format_instance(instance));
        }
    }

    let failures: Vec<_> = report
        .failures()
        .into_iter()
        .filter(|f| !f.tolerated)
        .collect();
    if !failures.is_empty() {
        lines.push(String::new());
        lines.push(format!("{} {}", CROSS, style("Failures:").red().bold()));
        for failure in failures {
            let location = failure.instance.as_deref().unwrap_or(&failure.job);
            lines.push(format!("  {}: {}", style(location).bold(), failure.error));
            if let Some(output) = failure.output.as_deref().filter(|o| !o.trim().is_empty()) {
                for line in format_output(output.trim_end(), 10).lines() {
                    lines.push(format!("    {}", style(line).dim()));
                }
            }
        }
    }

    lines.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_id, workflow } => format!(
            "{} Starting workflow {} ({})",
            ROCKET,
            style(workflow).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::JobExpansionFailed { job, error } => {
            format!("{} {}: {}", CROSS, style(job).red(), style(error).dim())
        }
        ExecutionEvent::InstanceStarted { instance } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::InstanceProvisioned {
            instance,
            cache_key,
        } => match cache_key {
            Some(key) => format!(
                "{} {} provisioned ({})",
                INFO,
                style(instance).cyan(),
                style(&key[..key.len().min(12)]).dim()
            ),
            None => format!("{} {} provisioned", INFO, style(instance).cyan()),
        },
        ExecutionEvent::ProvisioningFailed { instance, error } => format!(
            "{} {} provisioning failed: {}",
            CROSS,
            style(instance).red(),
            style(error).dim()
        ),
        ExecutionEvent::StepStarted {
            instance, name, ..
        } => format!("{} {} / {}", SPINNER, style(instance).dim(), style(name).cyan()),
        ExecutionEvent::StepOutput {
            instance,
            step_id,
            output,
        } => format!(
            "{} Output from {} / {}:\n{}",
            INFO,
            style(instance).dim(),
            style(step_id).dim(),
            output
        ),
        ExecutionEvent::StepCompleted { instance, step_id } => {
            format!("{} {} / {}", CHECK, style(instance).dim(), style(step_id).green())
        }
        ExecutionEvent::StepFailed {
            instance,
            step_id,
            reason,
            continue_on_error,
        } => {
            let icon = if *continue_on_error { WARN } else { CROSS };
            format!(
                "{} {} / {}: {}",
                icon,
                style(instance).dim(),
                style(step_id).red(),
                style(reason).dim()
            )
        }
        ExecutionEvent::StepSkipped {
            instance,
            step_id,
            reason,
        } => format!(
            "{} {} / {} ({})",
            SKIP,
            style(instance).dim(),
            style(step_id).dim(),
            style(reason).dim()
        ),
        ExecutionEvent::StepCancelled { instance, step_id } => format!(
            "{} {} / {} cancelled",
            WARN,
            style(instance).dim(),
            style(step_id).yellow()
        ),
        ExecutionEvent::InstanceCompleted { instance, status } => format!(
            "{} {} {}",
            status_icon(*status),
            style(instance).bold(),
            format_status(*status)
        ),
        ExecutionEvent::RunCompleted {
            run_id,
            workflow,
            status,
        } => format!(
            "{} Workflow {} ({}) {}",
            status_icon(*status),
            style(workflow).bold(),
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
