//! Test: Timeouts - step limits and job instance deadlines

use crate::helpers::*;
use flowline::core::{ExecutionStatus, FailureReason, FlowError, StepStatus};
use flowline::execution::EngineOptions;
use std::time::{Duration, Instant};

/// A step over its own limit is stopped and fails as a timeout
#[tokio::test]
async fn test_step_timeout_fails_step() {
    let harness = TestHarness::new();
    let started = Instant::now();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: hang
        timeout_secs: 1
        run: sleep 10
      - id: next
        run: echo next
"#,
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(6));

    let build = instance(&report, "build");
    assert_steps(
        build,
        &[("hang", StepStatus::Failure), ("next", StepStatus::Skipped)],
    );
    assert_eq!(step(build, "hang").failure, Some(FailureReason::Timeout));
    assert!(matches!(
        step(build, "hang").error(),
        Some(FlowError::Timeout { secs: 1, .. })
    ));
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// The instance deadline fails the running step and cancels the rest,
/// `always` steps included
#[tokio::test]
async fn test_job_timeout_cancels_remaining_steps() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    timeout_secs: 1
    steps:
      - id: first
        run: echo first
      - id: hang
        run: sleep 10
      - id: cleanup
        always: true
        run: echo cleanup
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_steps(
        build,
        &[
            ("first", StepStatus::Success),
            ("hang", StepStatus::Failure),
            ("cleanup", StepStatus::Cancelled),
        ],
    );
    assert_eq!(step(build, "hang").failure, Some(FailureReason::JobTimeout));
    assert_eq!(
        step(build, "cleanup").reason.as_deref(),
        Some("job timed out")
    );
    assert_eq!(build.status, ExecutionStatus::Failure);
}

/// A job deadline failure names the job limit, not the step's own limit
#[tokio::test]
async fn test_job_timeout_error_reports_job_limit() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    timeout_secs: 1
    steps:
      - id: hang
        timeout_secs: 600
        run: sleep 10
"#,
        )
        .await;

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].error,
        FlowError::JobTimeout {
            step: "hang".to_string(),
            secs: 1
        }
    );

    let message = failures[0].error.to_string();
    assert!(message.contains("1 seconds"));
    assert!(!message.contains("600"));
}

/// Engine-wide job timeout applies to jobs that set none
#[tokio::test]
async fn test_default_job_timeout_from_options() {
    let harness = TestHarness::with_options(EngineOptions {
        default_job_timeout: Some(Duration::from_secs(1)),
        ..EngineOptions::default()
    });
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: hang
        run: sleep 10
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_eq!(step(build, "hang").failure, Some(FailureReason::JobTimeout));
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// A step's own limit wins when it is shorter than the remaining deadline
#[tokio::test]
async fn test_step_limit_shorter_than_deadline() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
defaults:
  step_timeout_secs: 1
jobs:
  build:
    timeout_secs: 30
    steps:
      - id: hang
        run: sleep 10
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_eq!(step(build, "hang").failure, Some(FailureReason::Timeout));
}
