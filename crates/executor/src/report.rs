//! Suite and run reports.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use systest_core::model::TestSuite;

use crate::error::ExecutorError;
use crate::verdict::{Verdict, VerdictStatus};

/// Verdict counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_verdicts<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Self {
        let mut summary = Self::default();
        for verdict in verdicts {
            summary.total += 1;
            match verdict.status {
                VerdictStatus::Passed => summary.passed += 1,
                VerdictStatus::Failed => summary.failed += 1,
                VerdictStatus::Errored => summary.errored += 1,
                VerdictStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// No case failed or errored.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    fn add(&mut self, other: &Summary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.errored += other.errored;
        self.skipped += other.skipped;
    }
}

/// Result of one suite: one verdict per declared case, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    /// Document the suite was parsed from.
    pub source: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: Summary,
    pub verdicts: Vec<Verdict>,
}

impl SuiteReport {
    pub fn new(
        suite: &TestSuite,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        duration: Duration,
        verdicts: Vec<Verdict>,
    ) -> Self {
        Self {
            suite: suite.name.clone(),
            source: suite.location.source.clone(),
            run_id,
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            summary: Summary::from_verdicts(&verdicts),
            verdicts,
        }
    }

    pub fn verdict(&self, case: &str) -> Option<&Verdict> {
        self.verdicts.iter().find(|v| v.case == case)
    }
}

/// Results of every suite in one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut total = Summary::default();
        for suite in &self.suites {
            total.add(&suite.summary);
        }
        total
    }

    pub fn is_success(&self) -> bool {
        self.summary().is_success()
    }

    pub fn to_json(&self) -> Result<String, ExecutorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report as pretty JSON, creating parent directories.
    pub async fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ExecutorError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(parent, e))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| write_error(path, e))
    }
}

pub(crate) fn write_error(path: &Path, source: std::io::Error) -> ExecutorError {
    ExecutorError::Write {
        path: path.display().to_string(),
        source,
    }
}

/// Renders non-passing verdicts as `suite:case: cause` lines.
pub struct ResultLogFormatter;

impl ResultLogFormatter {
    pub fn format_issues(report: &RunReport) -> Vec<String> {
        report
            .suites
            .iter()
            .flat_map(Self::format_suite_issues)
            .collect()
    }

    pub fn format_suite_issues(report: &SuiteReport) -> Vec<String> {
        report
            .verdicts
            .iter()
            .filter(|v| v.is_failure())
            .map(|v| format!("{}:{}: {}", report.suite, v.case, v.summary()))
            .collect()
    }
}
