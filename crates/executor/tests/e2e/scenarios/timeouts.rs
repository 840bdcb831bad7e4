//! Timeout E2E tests.
//!
//! Validates the expectation window boundary, readiness timeouts and the
//! overall case timeout.

use systest_executor::{CaseState, CauseKind, ExecutorOptions, ExpectationOutcome, VerdictStatus};

use crate::helpers::assertions::*;
use crate::helpers::suites::*;

/// One record at `at_ms`, expected within 1000 ms.
fn boundary(at_ms: u64) -> String {
    format!(
        r#"
name: boundary
services:
  svc:
    kind: mock
    config:
      script:
        - {{at_ms: {at_ms}, payload: tick}}
tests:
  - name: tick
    expectations:
      - service: svc
        equals: tick
        timeout_ms: 1000
"#
    )
}

#[tokio::test(start_paused = true)]
async fn test_e2e_record_just_inside_window_passes() {
    // Given
    let suite = parse(&boundary(999));
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "tick");
    assert_passed(v);
    assert!(matches!(outcome(v, 0), ExpectationOutcome::Matched { offset_ms: 999, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_record_just_outside_window_times_out() {
    // Given
    let suite = parse(&boundary(1001));
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: a timeout, never a mismatch
    let v = verdict(&report, "tick");
    assert_cause(v, VerdictStatus::Failed, CauseKind::Expectations);
    match outcome(v, 0) {
        ExpectationOutcome::TimedOut(t) => {
            assert_eq!(t.timeout_ms, 1000);
            assert_eq!(t.records_seen, 0);
        }
        other => panic!("expected an observation timeout, got {other:?}"),
    }
    assert_eq!(stats.torn_down(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_service_never_ready_errors() {
    // Given: a service that never passes its readiness probe
    let yaml = r#"
name: stuck
services:
  svc:
    kind: mock
    readiness:
      timeout_ms: 500
    config:
      never_ready: true
tests:
  - name: waits
    expectations:
      - service: svc
        equals: never
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "waits");
    assert_cause(v, VerdictStatus::Errored, CauseKind::Provisioning);
    assert!(v.summary().contains("not ready after 500 ms"), "{}", v.summary());
    assert!(matches!(outcome(v, 0), ExpectationOutcome::NotEvaluated));
    assert_eq!(stats.provisioned(), 1);
    assert_eq!(stats.torn_down(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_readiness_timeout_covers_slow_provisioning() {
    // Given: provisioning alone outlasts the readiness timeout
    let yaml = r#"
name: slow
services:
  svc:
    kind: mock
    readiness:
      timeout_ms: 200
    config:
      provision_delay_ms: 1000
tests:
  - name: late
    expectations:
      - service: svc
        equals: x
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: the instance that eventually came up is still released
    assert_cause(verdict(&report, "late"), VerdictStatus::Errored, CauseKind::Provisioning);
    assert_eq!(stats.provisioned(), 1);
    assert_eq!(stats.torn_down(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_hanging_capture_hits_case_timeout() {
    // Given: capture never returns
    let yaml = r#"
name: hang
defaults:
  readiness_timeout_ms: 100
services:
  svc:
    kind: mock
    config:
      hang_capture: true
tests:
  - name: stalls
    expectations:
      - service: svc
        equals: x
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: the case fails on its own timeout and still tears down
    let v = verdict(&report, "stalls");
    assert_cause(v, VerdictStatus::Failed, CauseKind::CaseTimeout);
    assert_eq!(v.cause.as_ref().unwrap().state, Some(CaseState::Ready));
    assert!(matches!(outcome(v, 0), ExpectationOutcome::NotEvaluated));
    assert_eq!(stats.torn_down(), 1);
}
