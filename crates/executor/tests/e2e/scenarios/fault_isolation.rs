//! Fault isolation E2E tests.
//!
//! Validates that a failing case does not affect its neighbours, that
//! provider failures map to the right verdict, and that cleanup happens
//! on every path.

use std::time::Duration;

use systest_executor::{CauseKind, ExecutorOptions, ExpectationOutcome, VerdictStatus};

use crate::helpers::assertions::*;
use crate::helpers::suites::*;

const THREE_CASES: &str = r#"
name: isolation
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 10
  flaky:
    kind: mock
    config:
      fail_provision: true
tests:
  - name: first
    services: [echo]
    inputs:
      - service: echo
        payload: one
    expectations:
      - service: echo
        equals: one
        timeout_ms: 200
  - name: second
    services: [echo, flaky]
    inputs:
      - service: echo
        payload: two
    expectations:
      - service: echo
        equals: two
        timeout_ms: 200
  - name: third
    services: [echo]
    inputs:
      - service: echo
        payload: three
    expectations:
      - service: echo
        equals: three
        timeout_ms: 200
"#;

#[tokio::test(start_paused = true)]
async fn test_e2e_provisioning_failure_is_isolated_to_its_case() {
    // Given: the middle case depends on a service that cannot start
    let suite = parse(THREE_CASES);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: only the middle case errors
    assert_passed(verdict(&report, "first"));
    let second = verdict(&report, "second");
    assert_cause(second, VerdictStatus::Errored, CauseKind::Provisioning);
    assert!(second.summary().contains("flaky"));
    assert!(matches!(outcome(second, 0), ExpectationOutcome::NotEvaluated));
    assert_passed(verdict(&report, "third"));

    // Then: the echo instance started for `second` was released too
    assert_eq!(stats.provisioned(), 3);
    assert_eq!(stats.torn_down(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_slow_sibling_is_torn_down_after_fast_failure() {
    // Given: one service fails at once while its sibling is still starting
    let yaml = r#"
name: siblings
services:
  fast-fail:
    kind: mock
    config:
      fail_provision: true
  slow:
    kind: slow
    config:
      provision_delay_ms: 2000
tests:
  - name: both
    expectations:
      - service: slow
        equals: x
"#;
    let suite = parse(yaml);
    let (executor, stats) = executor_with_kinds(&["mock", "slow"], ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: the case errors on the fast failure, and the slow instance is
    // released once its provisioning completes
    assert_cause(verdict(&report, "both"), VerdictStatus::Errored, CauseKind::Provisioning);
    assert_eq!(stats[1].provisioned(), 1);
    assert_eq!(stats[1].torn_down(), 1);
    assert_eq!(stats[0].torn_down(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_provider_panic_is_a_crash_verdict() {
    // Given: a provider that panics on inject, then a healthy case
    let yaml = r#"
name: crash
services:
  bad:
    kind: mock
    config:
      panic_on_inject: true
  good:
    kind: mock
    config:
      echo_delay_ms: 10
tests:
  - name: panics
    services: [bad]
    inputs:
      - service: bad
        payload: x
    expectations:
      - service: bad
        equals: x
  - name: survives
    services: [good]
    inputs:
      - service: good
        payload: y
    expectations:
      - service: good
        equals: y
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "panics");
    assert_cause(v, VerdictStatus::Errored, CauseKind::ProviderCrash);
    assert!(v.summary().contains("panicked on inject"), "{}", v.summary());
    assert_passed(verdict(&report, "survives"));
    assert_eq!(stats.torn_down(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_dispatch_failure_errors_the_case() {
    // Given
    let yaml = r#"
name: dispatch
services:
  svc:
    kind: mock
    config:
      fail_dispatch: true
tests:
  - name: refused
    inputs:
      - service: svc
        payload: x
    expectations:
      - service: svc
        equals: x
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "refused");
    assert_cause(v, VerdictStatus::Errored, CauseKind::Dispatch);
    assert!(v.summary().contains("connection refused"));
    assert_eq!(stats.torn_down(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_teardown_failure_is_a_warning() {
    // Given: a passing case whose service fails to tear down
    let yaml = r#"
name: leaky
services:
  svc:
    kind: mock
    config:
      echo_delay_ms: 5
      fail_teardown: true
tests:
  - name: passes-anyway
    inputs:
      - service: svc
        payload: x
    expectations:
      - service: svc
        equals: x
        timeout_ms: 100
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: the verdict stands, the warning is attached
    let v = verdict(&report, "passes-anyway");
    assert_passed(v);
    assert_eq!(v.teardown_warnings.len(), 1);
    assert_eq!(v.teardown_warnings[0].service, "svc");
    assert!(v.teardown_warnings[0].message.contains("instance already gone"));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_unknown_kind_errors_at_provisioning() {
    // Given: a kind no provider serves
    let yaml = r#"
name: unknown
services:
  svc: {kind: teleporter}
tests:
  - name: t
    expectations:
      - service: svc
        equals: x
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "t");
    assert_cause(v, VerdictStatus::Errored, CauseKind::Provisioning);
    assert!(v.summary().contains("teleporter"));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_stop_on_first_failure_aborts_the_rest() {
    // Given: the first case fails its expectation
    let yaml = r#"
name: stop
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 5
tests:
  - name: fails
    inputs:
      - service: echo
        payload: a
    expectations:
      - service: echo
        equals: b
        timeout_ms: 100
  - name: never-runs
    expectations:
      - service: echo
        equals: a
  - name: never-runs-either
    expectations:
      - service: echo
        equals: a
"#;
    let suite = parse(yaml);
    let options = ExecutorOptions::default().with_stop_on_first_failure(true);
    let (executor, stats) = mock_executor(options);

    // When
    let report = executor.run(&suite).await;

    // Then
    assert_cause(verdict(&report, "fails"), VerdictStatus::Failed, CauseKind::Expectations);
    assert_cause(verdict(&report, "never-runs"), VerdictStatus::Failed, CauseKind::Aborted);
    assert_cause(verdict(&report, "never-runs-either"), VerdictStatus::Failed, CauseKind::Aborted);
    assert_eq!(stats.provision_calls(), 1);

    // When: running again, the flag is reset
    let again = executor.run(&suite).await;
    assert_cause(verdict(&again, "fails"), VerdictStatus::Failed, CauseKind::Expectations);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_cancellation_aborts_running_case_and_tears_down() {
    // Given: a case observing for a long window
    let yaml = r#"
name: long
services:
  svc: {kind: mock}
tests:
  - name: waits
    expectations:
      - service: svc
        equals: never
        timeout_ms: 60000
  - name: after
    expectations:
      - service: svc
        equals: never
"#;
    let suite = parse(yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());
    let token = executor.cancel_token();

    // When: cancelling while the first case observes
    let (report, ()) = tokio::join!(executor.run(&suite), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
    });

    // Then
    assert_cause(verdict(&report, "waits"), VerdictStatus::Failed, CauseKind::Aborted);
    assert_cause(verdict(&report, "after"), VerdictStatus::Failed, CauseKind::Aborted);
    assert_eq!(stats.provisioned(), 1);
    assert_eq!(stats.torn_down(), 1);
}
