//! Test: Cancellation - external cancel and superseded runs

use crate::helpers::*;
use flowline::core::{Event, EventKind, ExecutionStatus, StepStatus};
use flowline::execution::{cancel_pair, CancelToken};
use std::time::{Duration, Instant};

const SLOW: &str = r#"
name: ci
on:
  - event: push
    branches: ["master"]
jobs:
  build:
    steps:
      - id: hang
        run: sleep 10
      - id: after
        always: true
        run: echo after
"#;

/// Cancelling a run stops its commands and reports cancelled, not success
#[tokio::test]
async fn test_cancel_stops_running_steps() {
    let harness = TestHarness::new();
    let (handle, token) = cancel_pair();
    let started = Instant::now();

    let run = {
        let engine = harness.engine.clone();
        let workflow = workflow(SLOW);
        tokio::spawn(async move { engine.run_workflow(&workflow, None, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();
    let report = run.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(6));
    assert_run_status(&report, ExecutionStatus::Cancelled);

    let build = instance(&report, "build");
    assert_eq!(build.status, ExecutionStatus::Cancelled);
    assert_steps(
        build,
        &[("hang", StepStatus::Cancelled), ("after", StepStatus::Cancelled)],
    );
    assert!(report.failures().is_empty());
}

/// A token cancelled up front runs nothing
#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let harness = TestHarness::new();
    let (handle, token) = cancel_pair();
    handle.cancel();

    let report = harness
        .engine
        .run_workflow(&workflow(SLOW), None, &token)
        .await;

    let build = instance(&report, "build");
    assert_eq!(build.status, ExecutionStatus::Cancelled);
    assert!(build
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Cancelled && s.duration_ms.is_none()));
    assert_eq!(harness.cache.install_count(), 0);
}

/// A newer event for the same workflow and branch supersedes the older run
#[tokio::test]
async fn test_newer_run_supersedes_older() {
    let harness = TestHarness::new();
    let event = Event::new(EventKind::Push, "master");

    let older = {
        let engine = harness.engine.clone();
        let workflows = vec![workflow(SLOW)];
        let event = event.clone();
        tokio::spawn(async move {
            engine
                .run_event(&workflows, &event, &CancelToken::never())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;

    let fast = SLOW.replace("sleep 10", "echo quick");
    let newer = harness
        .engine
        .run_event(&[workflow(&fast)], &event, &CancelToken::never())
        .await;
    let older = older.await.unwrap();

    assert_eq!(older.len(), 1);
    assert_run_status(&older[0], ExecutionStatus::Cancelled);
    assert_eq!(newer.len(), 1);
    assert_run_status(&newer[0], ExecutionStatus::Success);
}

/// Runs on different branches do not interfere
#[tokio::test]
async fn test_other_branch_is_not_superseded() {
    let harness = TestHarness::new();
    let quick = r#"
name: ci
on:
  - event: push
jobs:
  build:
    steps:
      - run: sleep 1
"#;

    let first = {
        let engine = harness.engine.clone();
        let workflows = vec![workflow(quick)];
        tokio::spawn(async move {
            engine
                .run_event(
                    &workflows,
                    &Event::new(EventKind::Push, "master"),
                    &CancelToken::never(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = harness
        .engine
        .run_event(
            &[workflow(quick)],
            &Event::new(EventKind::Push, "develop"),
            &CancelToken::never(),
        )
        .await;
    let first = first.await.unwrap();

    assert_run_status(&first[0], ExecutionStatus::Success);
    assert_run_status(&second[0], ExecutionStatus::Success);
}
