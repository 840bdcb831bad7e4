//! Parallel case execution E2E tests.

use tokio::time::Instant;

use systest_executor::{CauseKind, ExecutorOptions, VerdictStatus};

use crate::helpers::assertions::*;
use crate::helpers::suites::*;

/// Four cases, each waiting out a one second window before failing or passing.
const SLOW_CASES: &str = r#"
name: parallel
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 900
tests:
  - name: c1
    inputs: [{service: echo, payload: one}]
    expectations: [{service: echo, equals: one, timeout_ms: 1000}]
  - name: c2
    inputs: [{service: echo, payload: two}]
    expectations: [{service: echo, equals: nope, timeout_ms: 1000}]
  - name: c3
    inputs: [{service: echo, payload: three}]
    expectations: [{service: echo, equals: three, timeout_ms: 1000}]
  - name: c4
    inputs: [{service: echo, payload: four}]
    expectations: [{service: echo, equals: four, timeout_ms: 1000}]
"#;

#[tokio::test(start_paused = true)]
async fn test_e2e_parallel_cases_keep_declaration_order() {
    // Given
    let suite = parse(SLOW_CASES);
    let (executor, stats) = mock_executor(ExecutorOptions::default().with_parallel_cases(4));

    // When
    let started = Instant::now();
    let report = executor.run(&suite).await;
    let elapsed = started.elapsed();

    // Then: verdicts come back in declaration order
    let names: Vec<&str> = report.verdicts.iter().map(|v| v.case.as_str()).collect();
    assert_eq!(names, vec!["c1", "c2", "c3", "c4"]);
    assert_cause(verdict(&report, "c2"), VerdictStatus::Failed, CauseKind::Expectations);
    assert_eq!(report.summary.passed, 3);

    // Then: the cases overlapped
    assert!(elapsed.as_millis() < 2000, "took {} ms", elapsed.as_millis());
    assert_eq!(stats.provisioned(), 4);
    assert_eq!(stats.torn_down(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_parallel_and_serial_runs_agree() {
    // Given
    let suite = parse(SLOW_CASES);
    let (serial, _) = mock_executor(ExecutorOptions::default());
    let (parallel, _) = mock_executor(ExecutorOptions::default().with_parallel_cases(2));

    // When
    let a = serial.run(&suite).await;
    let b = parallel.run(&suite).await;

    // Then
    let statuses = |r: &systest_executor::SuiteReport| {
        r.verdicts
            .iter()
            .map(|v| (v.case.clone(), v.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(statuses(&a), statuses(&b));
    assert_eq!(a.summary, b.summary);
}
