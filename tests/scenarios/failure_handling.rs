//! Test: Failure Handling - skipping, always-steps and continue-on-error

use crate::helpers::*;
use flowline::core::{ExecutionStatus, FailureReason, StepStatus};

/// Steps after a failure are skipped, `always` steps still run
#[tokio::test]
async fn test_failure_skips_rest_but_runs_always_steps() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: compile
        run: exit 2
      - id: test
        run: echo never
      - id: cleanup
        always: true
        run: echo cleaning up
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_steps(
        build,
        &[
            ("compile", StepStatus::Failure),
            ("test", StepStatus::Skipped),
            ("cleanup", StepStatus::Success),
        ],
    );
    assert_eq!(
        step(build, "compile").failure,
        Some(FailureReason::ExitCode(2))
    );
    assert_eq!(build.status, ExecutionStatus::Failure);
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// A tolerated failure is recorded but the instance keeps going and passes
#[tokio::test]
async fn test_continue_on_error_keeps_instance_green() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: flaky
        continue-on-error: true
        run: exit 1
      - id: main
        run: echo main
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_steps(
        build,
        &[("flaky", StepStatus::Failure), ("main", StepStatus::Success)],
    );
    assert!(step(build, "flaky").continue_on_error);
    assert_eq!(build.status, ExecutionStatus::Success);
    assert_run_status(&report, ExecutionStatus::Success);

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].tolerated);
}

/// A failing instance does not affect its siblings
#[tokio::test]
async fn test_sibling_instances_are_independent() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      n: ["1", "2", "3"]
    steps:
      - id: check
        run: test "${{ matrix.n }}" != "2"
      - id: after
        run: echo after
"#,
        )
        .await;

    assert_eq!(instance(&report, "test (1)").status, ExecutionStatus::Success);
    assert_eq!(instance(&report, "test (3)").status, ExecutionStatus::Success);

    let broken = instance(&report, "test (2)");
    assert_eq!(broken.status, ExecutionStatus::Failure);
    assert_steps(
        broken,
        &[("check", StepStatus::Failure), ("after", StepStatus::Skipped)],
    );
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// A bad matrix reference fails only its own job
#[tokio::test]
async fn test_undefined_axis_fails_only_its_job() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  broken:
    matrix:
      version: ["3.6"]
    steps:
      - run: echo "${{ matrix.os }}"
  healthy:
    steps:
      - run: echo fine
"#,
        )
        .await;

    let broken = report.jobs.iter().find(|j| j.name == "broken").unwrap();
    assert!(broken.instances.is_empty());
    assert!(broken.error.as_deref().unwrap().contains("matrix.os"));

    assert_eq!(instance(&report, "healthy").status, ExecutionStatus::Success);
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// Referencing an unregistered action fails the step, not the run setup
#[tokio::test]
async fn test_unknown_action_fails_step() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: publish
        uses: publish-artifact
      - id: notify
        always: true
        uses: record
        with:
          message: done
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_steps(
        build,
        &[
            ("publish", StepStatus::Failure),
            ("notify", StepStatus::Success),
        ],
    );
    assert!(matches!(
        step(build, "publish").failure,
        Some(FailureReason::Error(ref msg)) if msg.contains("publish-artifact")
    ));
    assert_eq!(harness.recorded().len(), 1);
}
