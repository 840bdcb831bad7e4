//! Per-case results.
//!
//! Every declared case ends with exactly one [`Verdict`]. Case-scoped failures
//! (provisioning, dispatch, crashes, case timeout) are recorded in
//! [`CaseCause`]; expectation failures in [`ExpectationResult`].

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Overall result of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// Every expectation held.
    Passed,
    /// An expectation failed, the case timed out, or the run was aborted.
    Failed,
    /// Infrastructure failed: provisioning, dispatch, capture or a provider crash.
    Errored,
    /// The case or its suite is disabled.
    Skipped,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case lifecycle. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseState {
    Pending,
    Provisioning,
    Ready,
    Injecting,
    Observing,
    Verifying,
    TornDown,
    Failed,
}

impl CaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown | Self::Failed)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Provisioning => "PROVISIONING",
            Self::Ready => "READY",
            Self::Injecting => "INJECTING",
            Self::Observing => "OBSERVING",
            Self::Verifying => "VERIFYING",
            Self::TornDown => "TORN_DOWN",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Why a case did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    Provisioning,
    Dispatch,
    Capture,
    ProviderCrash,
    Expectations,
    CaseTimeout,
    Aborted,
    Disabled,
}

impl CauseKind {
    /// Verdict status implied by this cause.
    pub fn status(&self) -> VerdictStatus {
        match self {
            Self::Provisioning | Self::Dispatch | Self::Capture | Self::ProviderCrash => {
                VerdictStatus::Errored
            }
            Self::Expectations | Self::CaseTimeout | Self::Aborted => VerdictStatus::Failed,
            Self::Disabled => VerdictStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseCause {
    pub kind: CauseKind,
    pub message: String,
    /// State the case was in when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CaseState>,
}

impl fmt::Display for CaseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "{} (in {state})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A record was seen but did not satisfy the expectation.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{reason}")]
pub struct MismatchError {
    pub reason: String,
    /// Payload of the closest candidate record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// `$.path: expected X, got Y` lines.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<String>,
}

/// No matching record arrived on the channel within the window.
///
/// Unrelated output on the channel does not turn this into a mismatch; the
/// first unclaimed record in the window is kept as detail instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("no matching record within {timeout_ms} ms ({records_seen} records seen on the channel)")]
pub struct ObservationTimeout {
    pub timeout_ms: u64,
    pub records_seen: usize,
    /// A matching record that arrived after the window closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub late: Option<LateRecord>,
    /// Payload of the first unclaimed record in the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LateRecord {
    pub seq: u64,
    pub offset_ms: u64,
}

/// Teardown problem. Logged and reported, never changes the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{service}: {message}")]
pub struct TeardownWarning {
    pub service: String,
    pub message: String,
}

/// Result of one expectation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExpectationOutcome {
    /// A record satisfied the matcher.
    Matched { seq: u64, offset_ms: u64 },
    /// `no_extra_output` held.
    Satisfied,
    Mismatched(MismatchError),
    TimedOut(ObservationTimeout),
    /// Verification never ran because the case failed earlier.
    NotEvaluated,
}

impl ExpectationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Matched { .. } | Self::Satisfied)
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched { .. } => "matched",
            Self::Satisfied => "satisfied",
            Self::Mismatched(_) => "mismatched",
            Self::TimedOut(_) => "timed_out",
            Self::NotEvaluated => "not_evaluated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectationResult {
    /// Position in the case's expectation list.
    pub index: usize,
    pub service: String,
    pub channel: String,
    /// Human-readable matcher, e.g. `equals {"id":1}`.
    pub expected: String,
    /// Document location of the expectation.
    pub location: String,
    #[serde(flatten)]
    pub outcome: ExpectationOutcome,
}

impl fmt::Display for ExpectationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}: ", self.service, self.channel, self.expected)?;
        match &self.outcome {
            ExpectationOutcome::Matched { seq, offset_ms } => {
                write!(f, "matched record #{seq} at {offset_ms} ms")
            }
            ExpectationOutcome::Satisfied => write!(f, "no extra output"),
            ExpectationOutcome::Mismatched(e) => {
                write!(f, "mismatch: {e}")?;
                for line in &e.diff {
                    write!(f, "; {line}")?;
                }
                Ok(())
            }
            ExpectationOutcome::TimedOut(e) => {
                write!(f, "timeout: {e}")?;
                if let Some(late) = e.late {
                    write!(f, "; matching record #{} arrived at {} ms", late.seq, late.offset_ms)?;
                }
                for line in &e.diff {
                    write!(f, "; {line}")?;
                }
                Ok(())
            }
            ExpectationOutcome::NotEvaluated => write!(f, "not evaluated"),
        }
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub case: String,
    pub status: VerdictStatus,
    /// `TORN_DOWN` for passing cases, `FAILED` otherwise, `PENDING` when skipped.
    pub state: CaseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<CaseCause>,
    pub expectations: Vec<ExpectationResult>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_warnings: Vec<TeardownWarning>,
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        self.status == VerdictStatus::Passed
    }

    /// Failed or errored.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, VerdictStatus::Failed | VerdictStatus::Errored)
    }

    /// One-line reason for a non-passing verdict.
    pub fn summary(&self) -> String {
        if let Some(cause) = &self.cause {
            if cause.kind != CauseKind::Expectations {
                return cause.to_string();
            }
        }
        let failed: Vec<String> = self
            .expectations
            .iter()
            .filter(|e| !e.outcome.is_success())
            .map(ToString::to_string)
            .collect();
        if failed.is_empty() {
            self.status.to_string()
        } else {
            failed.join(" | ")
        }
    }
}
