//! JUnit XML output.
//!
//! One `TEST-<suite>.xml` per suite, readable by CI test reporters.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::ExecutorError;
use crate::report::{SuiteReport, write_error};
use crate::verdict::{Verdict, VerdictStatus};

/// Writes suite reports as JUnit XML into a directory.
#[derive(Debug, Clone)]
pub struct JunitXmlWriter {
    dir: PathBuf,
}

impl JunitXmlWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File the report for `suite` is written to.
    pub fn path_for(&self, suite: &str) -> PathBuf {
        self.dir.join(format!("TEST-{}.xml", sanitize(suite)))
    }

    /// Writes one suite report. Returns the file path.
    pub async fn write(&self, report: &SuiteReport) -> Result<PathBuf, ExecutorError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(&self.dir, e))?;
        let path = self.path_for(&report.suite);
        tokio::fs::write(&path, render(report))
            .await
            .map_err(|e| write_error(&path, e))?;
        tracing::debug!(suite = %report.suite, path = %path.display(), "junit report written");
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Renders a suite report as a JUnit `testsuite` document.
pub fn render(report: &SuiteReport) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let s = &report.summary;
    let _ = writeln!(
        xml,
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="{}" skipped="{}" time="{}" timestamp="{}">"#,
        escape(&report.suite),
        s.total,
        s.failed,
        s.errored,
        s.skipped,
        seconds(report.duration_ms),
        report.started_at.format("%Y-%m-%dT%H:%M:%S"),
    );
    for verdict in &report.verdicts {
        render_case(&mut xml, &report.suite, verdict);
    }
    xml.push_str("</testsuite>\n");
    xml
}

fn render_case(xml: &mut String, suite: &str, verdict: &Verdict) {
    let _ = write!(
        xml,
        r#"  <testcase name="{}" classname="{}" time="{}""#,
        escape(&verdict.case),
        escape(suite),
        seconds(verdict.duration_ms),
    );

    let message = verdict
        .cause
        .as_ref()
        .map(|c| c.to_string())
        .unwrap_or_default();
    let body = match verdict.status {
        VerdictStatus::Passed => None,
        VerdictStatus::Failed => Some(format!(
            r#"    <failure message="{}">{}</failure>"#,
            escape(&message),
            escape(&details(verdict))
        )),
        VerdictStatus::Errored => Some(format!(
            r#"    <error message="{}">{}</error>"#,
            escape(&message),
            escape(&details(verdict))
        )),
        VerdictStatus::Skipped => Some(format!(r#"    <skipped message="{}"/>"#, escape(&message))),
    };
    let warnings: Vec<String> = verdict
        .teardown_warnings
        .iter()
        .map(ToString::to_string)
        .collect();

    if body.is_none() && warnings.is_empty() {
        xml.push_str("/>\n");
        return;
    }
    xml.push_str(">\n");
    if let Some(body) = body {
        xml.push_str(&body);
        xml.push('\n');
    }
    if !warnings.is_empty() {
        let _ = writeln!(
            xml,
            "    <system-err>{}</system-err>",
            escape(&warnings.join("\n"))
        );
    }
    xml.push_str("  </testcase>\n");
}

fn details(verdict: &Verdict) -> String {
    verdict
        .expectations
        .iter()
        .filter(|e| !e.outcome.is_success())
        .map(|e| format!("{e}\n  at {}", e.location))
        .collect::<Vec<_>>()
        .join("\n")
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Escapes text for XML attributes and content. Drops characters XML 1.0 cannot carry.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' | '\r' | '\t' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

/// File-name-safe form of a suite name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
