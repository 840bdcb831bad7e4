//! Case lifecycle E2E tests.
//!
//! Validates that every declared case yields exactly one verdict, that
//! every provisioned service is released, and that repeated runs agree.

use std::time::Duration;

use serde_json::json;

use systest_core::model::Input;
use systest_executor::{CaseState, CauseKind, ExecutorOptions, ExpectationOutcome, VerdictStatus};
use systest_parser::SuiteParser;

use crate::helpers::assertions::*;
use crate::helpers::suites::*;

const MIXED: &str = r#"
name: mixed
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 20
  broken:
    kind: mock
    config:
      fail_provision: true
tests:
  - name: passes
    services: [echo]
    inputs:
      - service: echo
        payload: ping
    expectations:
      - service: echo
        equals: ping
        timeout_ms: 500
  - name: wrong-answer
    services: [echo]
    inputs:
      - service: echo
        payload: ping
    expectations:
      - service: echo
        equals: pong
        timeout_ms: 500
  - name: cannot-start
    expectations:
      - service: echo
        equals: ping
  - name: parked
    disabled:
      reason: waiting on upstream fix
      issue: SYS-12
    services: [echo]
    expectations:
      - service: echo
        equals: ping
"#;

#[tokio::test(start_paused = true)]
async fn test_e2e_echo_case_passes() {
    // Given: an echo service and a case expecting its input back
    let suite = parse(ECHO_SUITE);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "says-hello");
    assert_passed(v);
    assert_eq!(v.state, CaseState::TornDown);
    assert!(matches!(
        outcome(v, 0),
        ExpectationOutcome::Matched { seq: 0, offset_ms: 50 }
    ));
    assert_eq!(stats.injected(), 1);
    assert!(report.summary.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_e2e_one_verdict_per_case_in_declaration_order() {
    // Given: a suite whose cases pass, fail, error and skip
    let suite = parse(MIXED);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: one verdict per declared case, in order
    let names: Vec<&str> = report.verdicts.iter().map(|v| v.case.as_str()).collect();
    assert_eq!(names, vec!["passes", "wrong-answer", "cannot-start", "parked"]);
    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.errored, 1);
    assert_eq!(report.summary.skipped, 1);

    assert_cause(verdict(&report, "wrong-answer"), VerdictStatus::Failed, CauseKind::Expectations);
    assert_cause(verdict(&report, "cannot-start"), VerdictStatus::Errored, CauseKind::Provisioning);
    assert_cause(verdict(&report, "parked"), VerdictStatus::Skipped, CauseKind::Disabled);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_every_provisioned_service_is_torn_down() {
    // Given: the mixed suite, where one case fails to provision a sibling
    let suite = parse(MIXED);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    executor.run(&suite).await;

    // Then: passes + wrong-answer + the echo half of cannot-start
    assert_eq!(stats.provisioned(), 3);
    assert_eq!(stats.torn_down(), stats.provisioned());
}

#[tokio::test(start_paused = true)]
async fn test_e2e_disabled_case_is_never_provisioned() {
    // Given: only the disabled case
    let mut suite = parse(MIXED);
    suite.cases.retain(|c| c.name == "parked");
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    let v = verdict(&report, "parked");
    assert_eq!(v.state, CaseState::Pending);
    assert!(v.summary().contains("SYS-12"));
    assert!(matches!(outcome(v, 0), ExpectationOutcome::NotEvaluated));
    assert_eq!(stats.provision_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_disabled_suite_skips_every_case() {
    // Given
    let yaml = format!("disabled: {{reason: maintenance}}\n{ECHO_SUITE}");
    let suite = parse(&yaml);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    assert_eq!(report.summary.skipped, 1);
    assert!(report.summary.is_success());
    assert_eq!(stats.provision_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_rerun_yields_same_verdicts() {
    // Given
    let suite = parse(MIXED);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When: running the same suite twice on the same executor
    let first = executor.run(&suite).await;
    let second = executor.run(&suite).await;

    // Then: statuses, causes and expectation outcomes agree
    let shape = |report: &systest_executor::SuiteReport| {
        report
            .verdicts
            .iter()
            .map(|v| {
                (
                    v.case.clone(),
                    v.status,
                    v.cause.as_ref().map(|c| c.kind),
                    v.expectations
                        .iter()
                        .map(|e| e.outcome.label())
                        .collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.summary, second.summary);
    assert_eq!(stats.torn_down(), stats.provisioned());
}

#[tokio::test(start_paused = true)]
async fn test_e2e_instances_get_unique_names() {
    // Given
    let suite = parse(MIXED);
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    executor.run(&suite).await;
    executor.run(&suite).await;

    // Then: no instance name is reused within the executor
    let mut names = stats.instances();
    let total = names.len();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), total);
    assert!(names.iter().all(|n| n.starts_with("echo-")));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_seed_is_dispatched_before_inputs() {
    // Given: a case with a seed input and an ordered expectation pair
    let yaml = r#"
name: seeded
defaults:
  ordering: ordered
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 10
tests:
  - name: boots-then-greets
    inputs:
      - service: echo
        payload: hello
        delay_ms: 100
    expectations:
      - service: echo
        equals: boot
        timeout_ms: 500
      - service: echo
        equals: hello
        timeout_ms: 500
"#;
    let mut suite = parse(yaml);
    suite.cases[0].seed.push(Input {
        service: "echo".to_owned(),
        channel: None,
        payload: json!("boot"),
        delay: Duration::ZERO,
        origin: Some("seed/boot".to_owned()),
    });
    let (executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then
    assert_passed(verdict(&report, "boots-then-greets"));
    assert_eq!(stats.injected(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_input_delay_is_measured_from_ready() {
    // Given: an input delayed 300 ms, echoed after 50 ms
    let yaml = r#"
name: delayed
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 50
      provision_delay_ms: 1000
tests:
  - name: late
    inputs:
      - service: echo
        payload: later
        delay_ms: 300
    expectations:
      - service: echo
        equals: later
        timeout_ms: 1000
"#;
    let suite = parse(yaml);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let report = executor.run(&suite).await;

    // Then: provisioning time does not count against the offsets
    let v = verdict(&report, "late");
    assert_passed(v);
    assert!(matches!(
        outcome(v, 0),
        ExpectationOutcome::Matched { offset_ms: 350, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_missing_reference_stops_before_any_provisioning() {
    // Given: an expectation referring to an unknown fragment
    let yaml = r#"
name: dangling
services:
  echo: {kind: mock}
tests:
  - name: t
    expectations:
      - ref: nowhere
"#;
    let (_executor, stats) = mock_executor(ExecutorOptions::default());

    // When
    let err = SuiteParser::new().parse("dangling.yaml", yaml).unwrap_err();

    // Then: nothing was run; the error names the missing id
    assert!(err.to_string().contains("nowhere"));
    assert_eq!(stats.provision_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_run_all_keeps_suite_order() {
    // Given
    let echo = parse(ECHO_SUITE);
    let mixed = parse(MIXED);
    let (executor, _stats) = mock_executor(ExecutorOptions::default());

    // When
    let run = executor.run_all(&[echo, mixed]).await;

    // Then
    let names: Vec<&str> = run.suites.iter().map(|s| s.suite.as_str()).collect();
    assert_eq!(names, vec!["echo", "mixed"]);
    assert_eq!(run.summary().total, 5);
    assert!(!run.is_success());
    assert!(run.suites.iter().all(|s| s.run_id == executor.run_id()));
}
