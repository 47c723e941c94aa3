//! Test: Step outputs and variables - what later steps can see

use crate::helpers::*;
use flowline::core::ExecutionStatus;

/// Action outputs feed later steps of the same instance
#[tokio::test]
async fn test_action_outputs_visible_to_later_steps() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: produce
        uses: set-output
        with:
          greeting: hello
      - id: consume
        uses: record
        with:
          message: "${{ steps.produce.outputs.greeting }} world"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
    let calls = harness.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "build");
    assert_eq!(calls[0].1["message"], "hello world");

    let build = instance(&report, "build");
    assert_eq!(step(build, "produce").outputs["greeting"], "hello");
}

/// Commands publish outputs through the file named by FLOWLINE_OUTPUT
#[tokio::test]
async fn test_command_outputs_via_output_file() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - id: version
        run: echo "sha=abc123" >> "$FLOWLINE_OUTPUT"
      - id: check
        run: test "${{ steps.version.outputs.sha }}" = "abc123"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
    let build = instance(&report, "build");
    assert_eq!(step(build, "version").outputs["sha"], "abc123");
}

/// Outputs never leak between instances; unresolved references render empty
#[tokio::test]
async fn test_outputs_scoped_to_their_instance() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  producer:
    steps:
      - id: produce
        uses: set-output
        with:
          token: secret
  consumer:
    steps:
      - uses: record
        with:
          token: "[${{ steps.produce.outputs.token }}]"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
    let calls = harness.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "consumer");
    assert_eq!(calls[0].1["token"], "[]");
}

/// Workflow, job and step variables layer from outermost to innermost
#[tokio::test]
async fn test_variables_layer_by_scope() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
env:
  STAGE: workflow
  REGION: eu
jobs:
  deploy:
    env:
      STAGE: job
    steps:
      - run: test "${{ env.STAGE }}-${{ env.REGION }}" = "job-eu"
      - run: test "$STAGE" = "step"
        env:
          STAGE: step
      - run: test "${{ job.name }}" = "deploy"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
}

/// Checkout copies the source tree into the instance workspace
#[tokio::test]
async fn test_checkout_populates_workspace() {
    let harness = TestHarness::new();
    std::fs::write(harness.source.path().join("hello.txt"), "hi\n").unwrap();
    std::fs::create_dir_all(harness.source.path().join(".git")).unwrap();

    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    steps:
      - uses: checkout
      - run: grep -q hi hello.txt
      - run: test ! -e .git
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
}

/// Each instance works in its own workspace
#[tokio::test]
async fn test_instances_do_not_share_workspaces() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      n: ["1", "2"]
    steps:
      - run: test ! -e marker
      - run: touch marker
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
}
