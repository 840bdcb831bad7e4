//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no I/O happens here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// systest -- run declarative system test suites.
///
/// Use `systest <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "systest", version, about, long_about = None)]
pub struct Cli {
    /// Path to the systest.toml configuration file.
    #[arg(short, long, global = true, default_value = "systest.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load every test package and run its suites.
    Run(RunArgs),

    /// Parse every test package without running anything.
    Validate(ValidateArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run ----

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Root directory of the test packages (default: executor.test_dir).
    #[arg(long)]
    pub test_dir: Option<PathBuf>,

    /// Where JUnit XML and report.json go (default: executor.results_dir).
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Abort the remaining cases after the first failing one.
    #[arg(long)]
    pub stop_on_first_failure: bool,

    /// Number of cases run at once.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub parallel: Option<u16>,

    /// Only run suites whose file path contains this text.
    #[arg(long)]
    pub filter: Option<String>,
}

// ---- validate ----

#[derive(Args, Debug, Default)]
pub struct ValidateArgs {
    /// Root directory of the test packages (default: executor.test_dir).
    #[arg(long)]
    pub test_dir: Option<PathBuf>,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, executor, docker, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}
