//! Test: Provisioning - cached dependency sets and provisioning failures

use crate::helpers::*;
use flowline::core::{ExecutionStatus, FlowError, StepStatus};

/// Instances sharing a dependency set install it once
#[tokio::test]
async fn test_shared_dependencies_install_once() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  test:
    matrix:
      shard: ["1", "2", "3"]
    dependencies:
      packages: [requests, pytest]
      install: |
        mkdir -p "$FLOWLINE_DEPS_DIR/bin"
        echo "$FLOWLINE_PACKAGES" > "$FLOWLINE_DEPS_DIR/installed.txt"
    steps:
      - run: grep -q pytest "$FLOWLINE_DEPS_DIR/installed.txt"
      - run: test -f "$FLOWLINE_DEPS_DIR/packages.txt"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
    assert_eq!(harness.cache.install_count(), 1);

    let keys: Vec<_> = report.instances().map(|i| i.cache_key.clone()).collect();
    assert_eq!(keys.len(), 3);
    assert!(keys[0].is_some());
    assert!(keys.iter().all(|k| *k == keys[0]));
}

/// Different dependency sets get their own cache entries
#[tokio::test]
async fn test_distinct_dependency_sets_install_separately() {
    let harness = TestHarness::new();
    let yaml = r#"
name: ci
jobs:
  test:
    matrix:
      version: ["3.6", "3.7"]
    dependencies:
      packages: ["lib-${{ matrix.version }}"]
    steps:
      - run: grep -q "lib-${{ matrix.version }}" "$FLOWLINE_DEPS_DIR/packages.txt"
"#;

    let first = harness.run(yaml).await;
    assert_run_status(&first, ExecutionStatus::Success);
    assert_eq!(harness.cache.install_count(), 2);

    // A second run is served from the cache
    let second = harness.run(yaml).await;
    assert_run_status(&second, ExecutionStatus::Success);
    assert_eq!(harness.cache.install_count(), 2);
}

/// A failed install skips every step and leaves nothing cached
#[tokio::test]
async fn test_failed_install_skips_all_steps() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    dependencies:
      packages: [broken]
      install: |
        echo "no such package" >&2
        exit 3
    steps:
      - id: compile
        run: echo compile
      - id: cleanup
        always: true
        run: echo cleanup
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert_eq!(build.status, ExecutionStatus::Failure);
    assert!(build
        .provisioning_error
        .as_deref()
        .unwrap()
        .contains("exit code 3"));
    assert_steps(
        build,
        &[
            ("compile", StepStatus::Skipped),
            ("cleanup", StepStatus::Skipped),
        ],
    );

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error, FlowError::Provisioning { .. }));
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// A platform the host cannot provide fails provisioning
#[tokio::test]
async fn test_unsupported_platform_fails_provisioning() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    runtime:
      platform: plan9
    steps:
      - id: compile
        run: echo compile
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert!(build.provisioning_error.as_deref().unwrap().contains("plan9"));
    assert_steps(build, &[("compile", StepStatus::Skipped)]);
    assert_run_status(&report, ExecutionStatus::Failure);
}

/// Manifests are read from the source tree and copied into the cache entry
#[tokio::test]
async fn test_manifest_feeds_install() {
    let harness = TestHarness::new();
    std::fs::write(harness.source.path().join("requirements.txt"), "flask\n").unwrap();

    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    dependencies:
      manifest: requirements.txt
      install: cp "$FLOWLINE_MANIFEST" "$FLOWLINE_DEPS_DIR/lock.txt"
    steps:
      - run: grep -q flask "$FLOWLINE_DEPS_DIR/lock.txt"
"#,
        )
        .await;

    assert_run_status(&report, ExecutionStatus::Success);
}

/// A missing manifest is a provisioning failure
#[tokio::test]
async fn test_missing_manifest_fails_provisioning() {
    let harness = TestHarness::new();
    let report = harness
        .run(
            r#"
name: ci
jobs:
  build:
    dependencies:
      manifest: missing.lock
    steps:
      - run: echo never
"#,
        )
        .await;

    let build = instance(&report, "build");
    assert!(build
        .provisioning_error
        .as_deref()
        .unwrap()
        .contains("missing.lock"));
    assert_eq!(harness.cache.install_count(), 0);
}
