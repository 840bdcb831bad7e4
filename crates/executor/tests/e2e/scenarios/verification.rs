//! Verification E2E tests.
//!
//! Validates matching semantics end to end: ordering modes, structural
//! matchers, channel separation and `no_extra_output`.

use pretty_assertions::assert_eq;
use systest_executor::{CauseKind, ExecutorOptions, ExpectationOutcome, VerdictStatus};

use crate::helpers::assertions::*;
use crate::helpers::suites::*;

/// Records `b` at 100 ms then `a` at 200 ms; expects `a` then `b`.
fn reversed(ordering: &str) -> String {
    format!(
        r#"
name: arrival
services:
  feed:
    kind: mock
    config:
      script:
        - {{at_ms: 100, payload: b}}
        - {{at_ms: 200, payload: a}}
tests:
  - name: a-then-b
    expectations:
      - service: feed
        equals: a
        ordering: {ordering}
        timeout_ms: 1000
      - service: feed
        equals: b
        ordering: {ordering}
        timeout_ms: 1000
"#
    )
}

#[tokio::test(start_paused = true)]
async fn test_e2e_unordered_passes_with_reversed_arrival() {
    // Given
    let suite = parse(&reversed("unordered"));
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: each expectation claims its own record
    let v = verdict(&report, "a-then-b");
    assert_passed(v);
    assert!(matches!(outcome(v, 0), ExpectationOutcome::Matched { offset_ms: 200, .. }));
    assert!(matches!(outcome(v, 1), ExpectationOutcome::Matched { offset_ms: 100, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_ordered_fails_with_reversed_arrival() {
    // Given
    let suite = parse(&reversed("ordered"));
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: `a` matches, `b` arrived before it and is the counter-example
    let v = verdict(&report, "a-then-b");
    assert_cause(v, VerdictStatus::Failed, CauseKind::Expectations);
    assert!(matches!(outcome(v, 0), ExpectationOutcome::Matched { .. }));
    match outcome(v, 1) {
        ExpectationOutcome::Mismatched(m) => {
            assert!(m.reason.contains("out of order"), "reason: {}", m.reason);
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_e2e_contains_reports_diff_on_timeout() {
    // Given: a structured record whose status differs from the expectation
    let yaml = r#"
name: api
services:
  api:
    kind: mock
    config:
      script:
        - {at_ms: 10, payload: {status: 500, body: {id: 7}}}
tests:
  - name: created
    expectations:
      - service: api
        contains: {status: 201, body: {id: 7}}
        timeout_ms: 200
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: nothing matched, the record seen is kept as detail
    let v = verdict(&report, "created");
    match outcome(v, 0) {
        ExpectationOutcome::TimedOut(t) => {
            assert_eq!(t.diff, vec!["$.status: expected 201, got 500".to_owned()]);
            assert!(t.actual.is_some());
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(v.summary().contains("$.status: expected 201, got 500"));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_late_record_behind_heartbeat_times_out() {
    // Given: a heartbeat inside the window, the expected record just after it
    let yaml = r#"
name: chatty
services:
  feed:
    kind: mock
    config:
      script:
        - {at_ms: 10, payload: heartbeat}
        - {at_ms: 1001, payload: a}
tests:
  - name: late
    expectations:
      - service: feed
        equals: a
        timeout_ms: 1000
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "late");
    assert_cause(v, VerdictStatus::Failed, CauseKind::Expectations);
    match outcome(v, 0) {
        ExpectationOutcome::TimedOut(t) => {
            assert_eq!(t.timeout_ms, 1000);
            assert_eq!(t.records_seen, 1);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_e2e_matches_and_contains_pass() {
    // Given
    let yaml = r#"
name: log
services:
  worker:
    kind: mock
    config:
      script:
        - {at_ms: 10, payload: "processed order 42"}
        - {at_ms: 20, payload: {event: shipped, order: 42, carrier: ups}}
tests:
  - name: both
    expectations:
      - service: worker
        matches: "^processed order \\d+$"
        timeout_ms: 100
      - service: worker
        contains: {event: shipped, order: 42}
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    assert_passed(verdict(&report, "both"));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_channels_are_matched_separately() {
    // Given: the expected payload only arrives on `err`
    let yaml = r#"
name: channels
services:
  proc:
    kind: mock
    config:
      script:
        - {at_ms: 10, channel: err, payload: boom}
tests:
  - name: on-stdout
    expectations:
      - service: proc
        equals: boom
        timeout_ms: 100
  - name: on-stderr
    expectations:
      - service: proc
        channel: err
        equals: boom
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: nothing arrived on `out`, so that is a timeout, not a mismatch
    let out = verdict(&report, "on-stdout");
    assert!(matches!(
        outcome(out, 0),
        ExpectationOutcome::TimedOut(t) if t.records_seen == 0
    ));
    assert_passed(verdict(&report, "on-stderr"));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_no_extra_output_flags_unclaimed_records() {
    // Given: two records, only one of them expected
    let yaml = r#"
name: quiet
services:
  svc:
    kind: mock
    config:
      script:
        - {at_ms: 10, payload: expected}
        - {at_ms: 50, payload: stray}
tests:
  - name: nothing-else
    expectations:
      - service: svc
        equals: expected
        timeout_ms: 200
      - service: svc
        no_extra_output: true
        timeout_ms: 200
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "nothing-else");
    assert!(matches!(outcome(v, 0), ExpectationOutcome::Matched { .. }));
    match outcome(v, 1) {
        ExpectationOutcome::Mismatched(m) => {
            assert_eq!(m.reason, "1 unexpected record(s)");
            assert_eq!(m.diff.len(), 1);
            assert!(m.diff[0].contains("stray"));
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_e2e_no_extra_output_satisfied_when_quiet() {
    // Given
    let yaml = r#"
name: quiet
services:
  svc:
    kind: mock
    config:
      echo_delay_ms: 5
tests:
  - name: only-echo
    inputs:
      - service: svc
        payload: hi
    expectations:
      - service: svc
        equals: hi
        timeout_ms: 100
      - service: svc
        no_extra_output: true
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "only-echo");
    assert_passed(v);
    assert!(matches!(outcome(v, 1), ExpectationOutcome::Satisfied));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_one_record_satisfies_one_expectation() {
    // Given: two identical expectations but a single record
    let yaml = r#"
name: single
services:
  svc:
    kind: mock
    config:
      script:
        - {at_ms: 10, payload: once}
tests:
  - name: twice
    expectations:
      - service: svc
        equals: once
        timeout_ms: 100
      - service: svc
        equals: once
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "twice");
    assert_eq!(v.status, VerdictStatus::Failed);
    let matched = v
        .expectations
        .iter()
        .filter(|e| e.outcome.is_success())
        .count();
    assert_eq!(matched, 1);
}
