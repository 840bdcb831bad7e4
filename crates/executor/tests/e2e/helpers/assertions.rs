//! Verdict assertions.

use systest_executor::{CauseKind, ExpectationOutcome, SuiteReport, Verdict, VerdictStatus};

/// Returns the verdict for `case`, panicking with the case list if absent.
#[allow(dead_code)]
pub fn verdict<'a>(report: &'a SuiteReport, case: &str) -> &'a Verdict {
    report.verdict(case).unwrap_or_else(|| {
        let names: Vec<&str> = report.verdicts.iter().map(|v| v.case.as_str()).collect();
        panic!("no verdict for '{case}', have {names:?}")
    })
}

#[allow(dead_code)]
pub fn assert_passed(verdict: &Verdict) {
    assert_eq!(
        verdict.status,
        VerdictStatus::Passed,
        "case '{}' should pass: {}",
        verdict.case,
        verdict.summary()
    );
}

/// Asserts the verdict status and the kind of its cause.
#[allow(dead_code)]
pub fn assert_cause(verdict: &Verdict, status: VerdictStatus, kind: CauseKind) {
    assert_eq!(verdict.status, status, "case '{}': {}", verdict.case, verdict.summary());
    let cause = verdict
        .cause
        .as_ref()
        .unwrap_or_else(|| panic!("case '{}' should carry a cause", verdict.case));
    assert_eq!(cause.kind, kind, "case '{}': {cause}", verdict.case);
}

/// Outcome of the expectation at `index`.
#[allow(dead_code)]
pub fn outcome(verdict: &Verdict, index: usize) -> &ExpectationOutcome {
    &verdict.expectations[index].outcome
}
