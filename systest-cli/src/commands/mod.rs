//! Command handlers -- one module per subcommand

pub mod config;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use systest_core::config::ExecutorConfig;
use systest_parser::{PackageLoader, ParseDefaults, SuiteParser};

/// The package loader both `run` and `validate` use: config defaults plus
/// the built-in kinds, so a misspelled kind fails before anything starts.
pub(crate) fn package_loader(config: &ExecutorConfig, filter: Option<String>) -> PackageLoader {
    let parser = SuiteParser::new()
        .with_defaults(ParseDefaults {
            expectation_timeout: Duration::from_millis(config.default_expectation_timeout_ms),
            readiness_timeout: Duration::from_millis(config.default_readiness_timeout_ms),
        })
        .with_known_kinds(systest_providers::BUILTIN_KINDS);
    PackageLoader::new(parser).with_filter(filter.unwrap_or_else(|| config.suite_filter.clone()))
}

pub(crate) fn resolve_dir(flag: Option<PathBuf>, configured: &str) -> PathBuf {
    flag.unwrap_or_else(|| Path::new(configured).to_path_buf())
}
