use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use systest_cli::cli::{Cli, Commands};
use systest_cli::commands;
use systest_cli::error::CliError;
use systest_cli::logging;
use systest_cli::output::OutputWriter;
use systest_core::config::{GeneralConfig, SystestConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // `config validate` reports a broken file itself; everything else needs it loaded.
    let loaded = SystestConfig::load_or_default(&cli.config).await;
    let general = loaded
        .as_ref()
        .map(|c| c.general.clone())
        .unwrap_or_else(|_| GeneralConfig::default());
    if let Err(e) = logging::init_tracing(&general, cli.log_level.as_deref()) {
        eprintln!("{} {e:#}", "warning:".yellow());
    }
    tracing::debug!(config = %cli.config.display(), "systest starting");

    let writer = OutputWriter::new(cli.output);
    let result = match cli.command {
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
        Commands::Run(args) => match loaded {
            Ok(config) => commands::run::execute(args, &config, &writer).await,
            Err(e) => Err(CliError::from(e)),
        },
        Commands::Validate(args) => match loaded {
            Ok(config) => commands::validate::execute(args, &config, &writer).await,
            Err(e) => Err(CliError::from(e)),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
