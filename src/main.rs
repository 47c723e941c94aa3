use anyhow::{Context, Result};
use flowline::action::ActionRegistry;
use flowline::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use flowline::cli::output::*;
use flowline::cli::{Cli, Command};
use flowline::core::config::WorkflowConfig;
use flowline::core::{StepDefaults, Workflow};
use flowline::execution::{
    cancel_pair, EngineOptions, ExecutionEngine, ExecutionEvent, LocalProvisioner,
    ProvisionCache, RunReport,
};
use flowline::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; stdout is reserved for results
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    let passed = match &cli.command {
        Command::Run(cmd) => run_workflows(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

fn load_workflows(cmd: &RunCommand) -> Result<Vec<Workflow>> {
    let base = StepDefaults {
        timeout_secs: cmd
            .step_timeout
            .unwrap_or_else(|| StepDefaults::default().timeout_secs),
    };

    let mut workflows = Vec::with_capacity(cmd.file.len());
    for file in &cmd.file {
        let config = WorkflowConfig::from_file(file)?;
        let mut workflow = config
            .to_workflow_with(&base)
            .with_context(|| format!("Invalid workflow file {}", file.display()))?;

        // Apply variable overrides
        for (key, value) in &cmd.env {
            workflow.env.insert(key.clone(), value.clone());
        }
        workflows.push(workflow);
    }
    Ok(workflows)
}

async fn open_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = flowline::persistence::SqliteRunStore::with_default_path().await?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without the sqlite feature; run history is not kept");
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
}

async fn run_workflows(cmd: &RunCommand) -> Result<bool> {
    let workflows = load_workflows(cmd)?;
    let event = cmd.trigger_event();
    let quiet = cmd.json;

    if !quiet {
        for workflow in &workflows {
            println!("{} Loaded workflow: {}", INFO, style(&workflow.name).bold());
        }
        for (key, value) in &cmd.env {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    let source_dir = match &cmd.source {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let cache = Arc::new(match &cmd.cache_dir {
        Some(dir) => ProvisionCache::new(dir),
        None => ProvisionCache::with_default_path(),
    });
    let provisioner = Arc::new(LocalProvisioner::new(cache).with_source_dir(&source_dir));

    let options = EngineOptions {
        strategy: cmd.scheduling_strategy(),
        default_job_timeout: cmd.job_timeout.map(Duration::from_secs),
        source_dir: Some(source_dir),
        ..EngineOptions::default()
    };
    let engine = ExecutionEngine::new(provisioner, ActionRegistry::with_builtins(), options);

    // Progress counts finished instances across the workflows that will run
    let selected: Vec<&Workflow> = match &event {
        Some(event) => workflows.iter().filter(|w| w.matches(event)).collect(),
        None => workflows.iter().collect(),
    };
    let total: usize = selected
        .iter()
        .flat_map(|w| &w.jobs)
        .filter_map(|job| job.expand().ok())
        .map(|instances| instances.len())
        .sum();

    let progress = if quiet {
        indicatif::ProgressBar::hidden()
    } else {
        create_progress_bar(total)
    };

    {
        let progress = progress.clone();
        let stream = cmd.stream;
        engine.add_event_handler(move |event| {
            if quiet {
                return;
            }
            match &event {
                ExecutionEvent::StepOutput { output, .. } => {
                    // Only with --stream
                    if stream {
                        progress.println(format_execution_event(&event));
                        progress.println(format_output(output, 20));
                    }
                    return;
                }
                ExecutionEvent::InstanceCompleted { instance, .. } => {
                    progress.inc(1);
                    progress.set_message(instance.clone());
                }
                _ => {}
            }
            progress.println(format_execution_event(&event));
        });
    }

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            handle.cancel();
        }
    });

    let reports: Vec<RunReport> = match &event {
        Some(event) => engine.run_event(&workflows, event, &token).await,
        None => {
            let mut reports = Vec::with_capacity(workflows.len());
            for workflow in &workflows {
                reports.push(engine.run_workflow(workflow, None, &token).await);
            }
            reports
        }
    };
    progress.finish_and_clear();

    if reports.is_empty() {
        if quiet {
            println!("[]");
        } else if let Some(event) = &event {
            println!("{} No workflow triggered by {}", INFO, style(event).bold());
        }
        return Ok(true);
    }

    // Save to history
    let store = open_store(cmd.no_history).await?;
    for report in &reports {
        if let Err(e) = store.save_run(&create_summary(report)).await {
            error!("Failed to save run {}: {:#}", report.run_id, e);
        }
    }

    if let Some(path) = &cmd.report {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if quiet {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("\n{}", format_run_report(report));
        }
        if !cmd.no_history {
            println!(
                "\n{} {} run(s) saved to history",
                INFO,
                style(reports.len()).cyan()
            );
        }
    }

    Ok(reports.iter().all(RunReport::passed))
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<bool> {
    let result = WorkflowConfig::from_file(&cmd.file).and_then(|config| {
        let workflow = config.to_workflow()?;
        Ok((config, workflow))
    });

    match result {
        Ok((config, workflow)) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(true);
            }

            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&workflow.name).bold());
            println!("  Triggers: {}", style(workflow.triggers.len()).cyan());
            println!("  Jobs: {}", style(workflow.jobs.len()).cyan());
            println!("  Variables: {}", style(workflow.env.len()).cyan());
            Ok(true)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(false)
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<bool> {
    let workflow = WorkflowConfig::from_file(&cmd.file)?.to_workflow()?;
    let mut passed = true;

    let mut plan = Vec::with_capacity(workflow.jobs.len());
    for job in &workflow.jobs {
        match job.expand() {
            Ok(instances) => plan.push(serde_json::json!({
                "job": job.name,
                "instances": instances
                    .iter()
                    .map(|i| serde_json::json!({
                        "name": i.name,
                        "matrix": i.matrix,
                        "runtime": i.runtime,
                        "steps": i.steps.iter().map(|s| &s.id).collect::<Vec<_>>(),
                    }))
                    .collect::<Vec<_>>(),
            })),
            Err(e) => {
                passed = false;
                plan.push(serde_json::json!({ "job": job.name, "error": e.to_string() }));
            }
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(passed);
    }

    println!("{} Plan for {}", INFO, style(&workflow.name).bold());
    for trigger in &workflow.triggers {
        println!(
            "  on {} {}",
            style(trigger.kind).cyan(),
            style(trigger.branches.join(", ")).dim()
        );
    }
    for job in &workflow.jobs {
        match job.expand() {
            Ok(instances) => {
                println!("\n  {} ({} instance(s))", style(&job.name).bold(), instances.len());
                for instance in instances {
                    let steps: Vec<String> = instance.steps.iter().map(|s| s.describe()).collect();
                    println!("    {} {}", ROCKET, style(&instance.name).cyan());
                    for step in steps {
                        println!("      {}", style(step).dim());
                    }
                }
            }
            Err(e) => println!("\n  {} {}: {}", CROSS, style(&job.name).bold(), style(e).red()),
        }
    }

    Ok(passed)
}

async fn show_history(cmd: &HistoryCommand) -> Result<bool> {
    let store = open_store(false).await?;

    // If specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(true);
    }

    let runs = match &cmd.workflow {
        Some(workflow) => {
            let mut runs = store.list_runs(workflow).await?;
            runs.truncate(cmd.limit);
            runs
        }
        None => store.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(true);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(true)
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow).bold());
    if let Some(event) = &summary.event {
        println!("  Event: {}", style(event).dim());
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        let elapsed = (completed - summary.started_at).num_milliseconds().max(0) as u64;
        println!("  Duration: {}", style(format_duration(elapsed)).dim());
    }
    println!(
        "  Instances: {} ({} failed)",
        summary.total_instances,
        style(summary.failed_instances).red()
    );
    for failure in &summary.failures {
        println!("    {} {}", CROSS, failure);
    }

    Ok(())
}
