//! Test: Triggers - which workflows an event starts

use crate::helpers::*;
use flowline::core::{Event, EventKind, ExecutionStatus};
use flowline::execution::CancelToken;

const RELEASE: &str = r#"
name: release
on:
  - event: push
    branches: ["master", "releases/**"]
jobs:
  build:
    steps:
      - run: echo building
"#;

const REVIEW: &str = r#"
name: review
on:
  - event: pull_request
    branches: ["master"]
jobs:
  lint:
    steps:
      - run: echo linting
"#;

/// A push to a release branch starts only the workflow listening for it
#[tokio::test]
async fn test_push_to_release_branch_selects_workflow() {
    let harness = TestHarness::new();
    let workflows = vec![workflow(RELEASE), workflow(REVIEW)];

    let reports = harness
        .engine
        .run_event(
            &workflows,
            &Event::new(EventKind::Push, "releases/v1"),
            &CancelToken::never(),
        )
        .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].workflow, "release");
    assert_eq!(
        reports[0].event,
        Some(Event::new(EventKind::Push, "releases/v1"))
    );
    assert_run_status(&reports[0], ExecutionStatus::Success);
}

/// No trigger matching is a normal, empty outcome
#[tokio::test]
async fn test_unmatched_event_runs_nothing() {
    let harness = TestHarness::new();
    let workflows = vec![workflow(RELEASE), workflow(REVIEW)];

    let reports = harness
        .engine
        .run_event(
            &workflows,
            &Event::new(EventKind::Push, "feature/login"),
            &CancelToken::never(),
        )
        .await;

    assert!(reports.is_empty());
    assert!(harness.events.lock().unwrap().is_empty());
}

/// Several workflows can react to one event; they run in input order
#[tokio::test]
async fn test_every_matching_workflow_runs_in_order() {
    let harness = TestHarness::new();
    let docs = r#"
name: docs
on:
  - event: pull_request
jobs:
  build:
    steps:
      - run: echo docs
"#;
    let workflows = vec![workflow(RELEASE), workflow(REVIEW), workflow(docs)];

    let reports = harness
        .engine
        .run_event(
            &workflows,
            &Event::new(EventKind::PullRequest, "master"),
            &CancelToken::never(),
        )
        .await;

    let names: Vec<_> = reports.iter().map(|r| r.workflow.as_str()).collect();
    assert_eq!(names, vec!["review", "docs"]);
}
