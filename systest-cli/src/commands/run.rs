//! `systest run` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use colored::{ColoredString, Colorize};
use tracing::{info, warn};
use uuid::Uuid;

use systest_core::config::SystestConfig;
use systest_core::registry::ProviderRegistry;
use systest_executor::verdict::VerdictStatus;
use systest_executor::{ExecutorOptions, JunitXmlWriter, ResultLogFormatter, RunReport, SuiteExecutor};

use crate::cli::RunArgs;
use crate::commands::{package_loader, resolve_dir};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Name of the JSON report inside the results directory.
pub const REPORT_FILE: &str = "report.json";

/// Execute the `run` command.
///
/// # Errors
///
/// - `CliError::Parse` when any package fails to load (nothing runs)
/// - `CliError::Results` when results cannot be written
/// - `CliError::TestsFailed` when a case failed or errored
pub async fn execute(
    args: RunArgs,
    config: &SystestConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let report = run(args, config).await?;
    writer.render(&report)?;

    let summary = report.summary();
    if !summary.is_success() {
        return Err(CliError::TestsFailed {
            total: summary.total,
            failed: summary.failed,
            errored: summary.errored,
        });
    }
    Ok(())
}

/// Loads, runs and writes results. Ctrl-C aborts the remaining cases; the
/// report is still written.
pub async fn run(args: RunArgs, config: &SystestConfig) -> Result<RunReport, CliError> {
    let test_dir = resolve_dir(args.test_dir, &config.executor.test_dir);
    let results_dir = resolve_dir(args.results_dir, &config.executor.results_dir);

    let packages = package_loader(&config.executor, args.filter)
        .load_root(&test_dir)
        .await?;
    for package in &packages {
        for fragment in &package.unused {
            warn!(package = %package.dir.display(), fragment = %fragment, "unused fragment");
        }
    }
    let suites: Vec<_> = packages.into_iter().flat_map(|p| p.suites).collect();
    if suites.is_empty() {
        warn!(test_dir = %test_dir.display(), "no suites found");
    }

    let run_id = Uuid::new_v4();
    let mut registry = ProviderRegistry::new();
    systest_providers::register_builtin(&mut registry, &config.docker, run_id)?;

    if config.metrics.enabled {
        systest_core::metrics::describe_all();
    }

    let mut options = ExecutorOptions::from_config(&config.executor);
    if args.stop_on_first_failure {
        options = options.with_stop_on_first_failure(true);
    }
    if let Some(parallel) = args.parallel {
        options = options.with_parallel_cases(usize::from(parallel));
    }

    let executor = SuiteExecutor::new(Arc::new(registry), options).with_run_id(run_id);
    let cancel = executor.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, aborting remaining cases");
            cancel.cancel();
        }
    });

    info!(run_id = %run_id, suites = suites.len(), "starting run");
    let report = executor.run_all(&suites).await;
    interrupt.abort();

    write_results(&report, &results_dir).await?;
    for issue in ResultLogFormatter::format_issues(&report) {
        warn!("{issue}");
    }
    Ok(report)
}

/// Writes one JUnit file per suite and `report.json`.
pub async fn write_results(report: &RunReport, dir: &Path) -> Result<(), CliError> {
    let junit = JunitXmlWriter::new(dir);
    for suite in &report.suites {
        junit.write(suite).await?;
    }
    report.write_json(dir.join(REPORT_FILE)).await?;
    info!(dir = %dir.display(), "results written");
    Ok(())
}

fn status_label(status: VerdictStatus) -> ColoredString {
    let label = status.as_str().to_uppercase();
    match status {
        VerdictStatus::Passed => label.green().bold(),
        VerdictStatus::Failed => label.red().bold(),
        VerdictStatus::Errored => label.magenta().bold(),
        VerdictStatus::Skipped => label.yellow(),
    }
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for suite in &self.suites {
            writeln!(
                w,
                "{} ({}/{} passed, {} ms)",
                suite.suite.bold(),
                suite.summary.passed,
                suite.summary.total,
                suite.duration_ms
            )?;
            for verdict in &suite.verdicts {
                write!(w, "  {:<8} {}", status_label(verdict.status), verdict.case)?;
                if verdict.is_passed() {
                    writeln!(w, " ({} ms)", verdict.duration_ms)?;
                } else {
                    writeln!(w, ": {}", verdict.summary())?;
                }
                for warning in &verdict.teardown_warnings {
                    writeln!(
                        w,
                        "           {} teardown of {}: {}",
                        "warning:".yellow(),
                        warning.service,
                        warning.message
                    )?;
                }
            }
        }

        let s = self.summary();
        let line = format!(
            "{} total, {} passed, {} failed, {} errored, {} skipped",
            s.total, s.passed, s.failed, s.errored, s.skipped
        );
        if s.is_success() {
            writeln!(w, "{}", line.green())
        } else {
            writeln!(w, "{}", line.red())
        }
    }
}
