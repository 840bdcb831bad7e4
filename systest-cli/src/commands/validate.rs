//! `systest validate` command handler

use std::io::Write;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use systest_core::config::SystestConfig;
use systest_core::model::TestSuite;
use systest_parser::TestPackage;

use crate::cli::ValidateArgs;
use crate::commands::{package_loader, resolve_dir};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `validate` command.
///
/// Parses every package below the test directory and renders what was found.
///
/// # Errors
///
/// Returns `CliError::Parse` for the first document that fails to parse,
/// after rendering the report.
pub async fn execute(
    args: ValidateArgs,
    config: &SystestConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let (report, error) = validate(args, config).await;
    writer.render(&report)?;
    error.map_or(Ok(()), Err)
}

/// Loads the packages and builds the report. The error, if any, is returned
/// alongside so callers can still render what was found.
pub async fn validate(
    args: ValidateArgs,
    config: &SystestConfig,
) -> (ValidationReport, Option<CliError>) {
    let test_dir = resolve_dir(args.test_dir, &config.executor.test_dir);
    info!(test_dir = %test_dir.display(), "validating test packages");

    match package_loader(&config.executor, None).load_root(&test_dir).await {
        Ok(packages) => (ValidationReport::valid(&test_dir, &packages), None),
        Err(e) => (
            ValidationReport::invalid(&test_dir, e.to_string()),
            Some(CliError::Parse(e)),
        ),
    }
}

/// Validation result.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub test_dir: String,
    pub valid: bool,
    pub packages: Vec<PackageEntry>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PackageEntry {
    pub dir: PathBuf,
    pub suites: Vec<SuiteEntry>,
    /// Fragment files no suite used.
    pub unused: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SuiteEntry {
    pub name: String,
    pub source: String,
    pub services: usize,
    pub cases: usize,
    pub disabled_cases: usize,
    pub disabled: bool,
}

impl From<&TestSuite> for SuiteEntry {
    fn from(suite: &TestSuite) -> Self {
        Self {
            name: suite.name.clone(),
            source: suite.location.source.clone(),
            services: suite.services.len(),
            cases: suite.cases.len(),
            disabled_cases: suite.cases.iter().filter(|c| c.disabled.is_some()).count(),
            disabled: suite.disabled.is_some(),
        }
    }
}

impl ValidationReport {
    fn valid(test_dir: &Path, packages: &[TestPackage]) -> Self {
        Self {
            test_dir: test_dir.display().to_string(),
            valid: true,
            packages: packages
                .iter()
                .map(|p| PackageEntry {
                    dir: p.dir.clone(),
                    suites: p.suites.iter().map(SuiteEntry::from).collect(),
                    unused: p.unused.clone(),
                })
                .collect(),
            errors: Vec::new(),
        }
    }

    fn invalid(test_dir: &Path, error: String) -> Self {
        Self {
            test_dir: test_dir.display().to_string(),
            valid: false,
            packages: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn suite_count(&self) -> usize {
        self.packages.iter().map(|p| p.suites.len()).sum()
    }
}

impl Render for ValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if !self.valid {
            writeln!(w, "{} {}", "invalid".red().bold(), self.test_dir)?;
            for error in &self.errors {
                writeln!(w, "  {error}")?;
            }
            return Ok(());
        }

        for package in &self.packages {
            writeln!(w, "{}", package.dir.display().to_string().bold())?;
            for suite in &package.suites {
                let mut line = format!(
                    "  {} ({} case(s), {} service(s))",
                    suite.name, suite.cases, suite.services
                );
                if suite.disabled {
                    line.push_str(" [disabled]");
                } else if suite.disabled_cases > 0 {
                    line.push_str(&format!(" [{} disabled]", suite.disabled_cases));
                }
                writeln!(w, "{line}")?;
            }
            for fragment in &package.unused {
                writeln!(w, "  {} unused fragment {fragment}", "warning:".yellow())?;
            }
        }
        writeln!(
            w,
            "{} {} suite(s) in {} package(s)",
            "valid".green().bold(),
            self.suite_count(),
            self.packages.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, disabled: bool, disabled_cases: usize) -> SuiteEntry {
        SuiteEntry {
            name: name.to_owned(),
            source: format!("{name}.yaml"),
            services: 1,
            cases: 2,
            disabled_cases,
            disabled,
        }
    }

    #[test]
    fn text_lists_suites_and_unused_fragments() {
        colored::control::set_override(false);
        let report = ValidationReport {
            test_dir: "system-tests".to_owned(),
            valid: true,
            packages: vec![PackageEntry {
                dir: PathBuf::from("system-tests/echo"),
                suites: vec![entry("echo", false, 1), entry("legacy", true, 0)],
                unused: vec!["inputs/old".to_owned()],
            }],
            errors: Vec::new(),
        };

        let mut out = Vec::new();
        report.render_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("echo (2 case(s), 1 service(s)) [1 disabled]"), "{text}");
        assert!(text.contains("legacy (2 case(s), 1 service(s)) [disabled]"), "{text}");
        assert!(text.contains("warning: unused fragment inputs/old"), "{text}");
        assert!(text.contains("valid 2 suite(s) in 1 package(s)"), "{text}");
    }

    #[test]
    fn invalid_report_lists_errors() {
        colored::control::set_override(false);
        let report = ValidationReport::invalid(Path::new("t"), "t/a.yaml: boom".to_owned());

        let mut out = Vec::new();
        report.render_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("invalid t"));
        assert!(text.contains("t/a.yaml: boom"));
    }
}
