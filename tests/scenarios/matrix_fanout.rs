//! Test: Matrix fan-out - one instance per axis combination

use crate::helpers::*;
use flowline::core::{ExecutionStatus, FlowError, StepStatus};

/// One failing step fails its instance and the whole run
#[tokio::test]
async fn test_failing_second_step_fails_run() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.6"]
    steps:
      - id: step1
        run: echo "testing ${{ matrix.version }}"
      - id: step2
        run: exit 1
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Failure);

    let test = instance(&report, "test (3.6)");
    assert_eq!(test.status, ExecutionStatus::Failure);
    assert_steps(
        test,
        &[("step1", StepStatus::Success), ("step2", StepStatus::Failure)],
    );
    assert!(step(test, "step1")
        .output
        .as_deref()
        .unwrap_or_default()
        .contains("testing 3.6"));

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step.as_deref(), Some("step2"));
    assert!(matches!(
        &failures[0].error,
        FlowError::StepFailure { step, .. } if step == "step2"
    ));
}

/// Instances are reported in axis order, first axis varying slowest
#[tokio::test]
async fn test_instances_follow_declaration_order() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.6", "3.7"]
      os: [linux, macos]
    steps:
      - run: test -n "${{ matrix.version }}-${{ matrix.os }}"
"#,
        )
        .await;

    let names: Vec<_> = report.instances().map(|i| i.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "test (3.6, linux)",
            "test (3.6, macos)",
            "test (3.7, linux)",
            "test (3.7, macos)",
        ]
    );
    assert_run_status(&report, ExecutionStatus::Success);
}

/// Matrix values reach commands and step env
#[tokio::test]
async fn test_matrix_values_are_substituted() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.7"]
    steps:
      - run: test "${{ matrix.version }}" = "3.7"
      - run: test "$PY" = "python3.7"
        env:
          PY: "python${{ matrix.version }}"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
}

/// Excluded combinations never become instances
#[tokio::test]
async fn test_exclude_removes_combinations() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.6", "3.7"]
      os: [linux, macos]
      exclude:
        - version: "3.6"
          os: macos
    steps:
      - run: "true"
"#,
        )
        .await;

    let names: Vec<_> = report.instances().map(|i| i.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["test (3.6, linux)", "test (3.7, linux)", "test (3.7, macos)"]
    );
}

/// Excluding every combination fails the job instead of passing it empty
#[tokio::test]
async fn test_excluding_every_combination_fails_run() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.6", "3.7"]
      exclude:
        - version: "3.6"
        - version: "3.7"
    steps:
      - run: exit 1
"#,
        )
        .await;

    let test = &report.jobs[0];
    assert!(test.instances.is_empty());
    assert!(test.error.as_deref().unwrap().contains("no instances"));
    assert_run_status(&report, ExecutionStatus::Failure);
    assert!(!report.passed());
}

/// A job without a matrix runs exactly once under its own name
#[tokio::test]
async fn test_job_without_matrix_runs_once() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  lint:
    steps:
      - run: echo lint
  build:
    steps:
      - run: echo build
"#,
        )
        .await;

    let names: Vec<_> = report.instances().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["lint", "build"]);
    assert_run_status(&report, ExecutionStatus::Success);
}
