//! Configuration: `systest.toml` parsing and runtime settings.
//!
//! [`SystestConfig`] holds every section; each crate reads only its own.
//!
//! # Load order
//! 1. CLI flags (highest)
//! 2. Environment variables (`SYSTEST_EXECUTOR_PARALLEL_CASES=4`)
//! 3. Config file (`systest.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), systest_core::error::SystestError> {
//! use systest_core::config::SystestConfig;
//!
//! let config = SystestConfig::load("systest.toml").await?;
//! let config = SystestConfig::parse("[executor]\nparallel_cases = 2")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, SystestError};

/// Upper bound for any millisecond timeout.
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Upper bound for concurrently running cases.
pub const MAX_PARALLEL_CASES: usize = 64;

/// Root of `systest.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystestConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl SystestConfig {
    /// Loads `path`, applies environment overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SystestError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SystestError> {
        let path = path.as_ref();
        let mut config = match Self::from_file(path).await {
            Ok(config) => config,
            Err(SystestError::Config(ConfigError::FileNotFound { .. })) => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SystestError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SystestError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SystestError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, SystestError> {
        toml::from_str(toml_str).map_err(|e| {
            SystestError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `SYSTEST_{SECTION}_{FIELD}` environment variables.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SYSTEST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SYSTEST_GENERAL_LOG_FORMAT");

        // Executor
        override_string(&mut self.executor.test_dir, "SYSTEST_EXECUTOR_TEST_DIR");
        override_string(&mut self.executor.results_dir, "SYSTEST_EXECUTOR_RESULTS_DIR");
        override_bool(
            &mut self.executor.stop_on_first_failure,
            "SYSTEST_EXECUTOR_STOP_ON_FIRST_FAILURE",
        );
        override_usize(
            &mut self.executor.parallel_cases,
            "SYSTEST_EXECUTOR_PARALLEL_CASES",
        );
        override_u64(
            &mut self.executor.default_expectation_timeout_ms,
            "SYSTEST_EXECUTOR_DEFAULT_EXPECTATION_TIMEOUT_MS",
        );
        override_u64(
            &mut self.executor.default_readiness_timeout_ms,
            "SYSTEST_EXECUTOR_DEFAULT_READINESS_TIMEOUT_MS",
        );
        override_u64(
            &mut self.executor.dispatch_timeout_ms,
            "SYSTEST_EXECUTOR_DISPATCH_TIMEOUT_MS",
        );
        override_u64(
            &mut self.executor.teardown_timeout_ms,
            "SYSTEST_EXECUTOR_TEARDOWN_TIMEOUT_MS",
        );
        override_u64(
            &mut self.executor.case_timeout_grace_ms,
            "SYSTEST_EXECUTOR_CASE_TIMEOUT_GRACE_MS",
        );
        override_string(&mut self.executor.suite_filter, "SYSTEST_EXECUTOR_SUITE_FILTER");

        // Docker
        override_string(&mut self.docker.socket, "SYSTEST_DOCKER_SOCKET");
        override_string(&mut self.docker.network, "SYSTEST_DOCKER_NETWORK");
        override_bool(&mut self.docker.pull_images, "SYSTEST_DOCKER_PULL_IMAGES");
        override_string(&mut self.docker.label_prefix, "SYSTEST_DOCKER_LABEL_PREFIX");

        // Metrics
        override_bool(&mut self.metrics.enabled, "SYSTEST_METRICS_ENABLED");
    }

    /// Checks value ranges and enumerations.
    pub fn validate(&self) -> Result<(), SystestError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.executor.test_dir.is_empty() {
            return Err(invalid("executor.test_dir", "must not be empty".to_owned()));
        }

        if self.executor.results_dir.is_empty() {
            return Err(invalid(
                "executor.results_dir",
                "must not be empty".to_owned(),
            ));
        }

        if self.executor.parallel_cases == 0 || self.executor.parallel_cases > MAX_PARALLEL_CASES
        {
            return Err(invalid(
                "executor.parallel_cases",
                format!("must be between 1 and {MAX_PARALLEL_CASES}"),
            ));
        }

        let timeouts = [
            (
                "executor.default_expectation_timeout_ms",
                self.executor.default_expectation_timeout_ms,
            ),
            (
                "executor.default_readiness_timeout_ms",
                self.executor.default_readiness_timeout_ms,
            ),
            (
                "executor.dispatch_timeout_ms",
                self.executor.dispatch_timeout_ms,
            ),
            (
                "executor.teardown_timeout_ms",
                self.executor.teardown_timeout_ms,
            ),
        ];
        for (field, value) in timeouts {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(invalid(
                    field,
                    format!("must be between 1 and {MAX_TIMEOUT_MS}"),
                ));
            }
        }

        if self.executor.case_timeout_grace_ms > MAX_TIMEOUT_MS {
            return Err(invalid(
                "executor.case_timeout_grace_ms",
                format!("must be at most {MAX_TIMEOUT_MS}"),
            ));
        }

        if self.docker.label_prefix.is_empty()
            || !self
                .docker
                .label_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "docker.label_prefix",
                "must be non-empty and contain only [A-Za-z0-9_-]".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> SystestError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// `[general]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// `[executor]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Root directory scanned for test packages.
    pub test_dir: String,
    /// Where JUnit XML and the JSON report are written.
    pub results_dir: String,
    /// Abort the remaining cases after the first non-passing one.
    pub stop_on_first_failure: bool,
    /// Cases run at once. 1 means sequential.
    pub parallel_cases: usize,
    /// Expectation timeout when a document gives none.
    pub default_expectation_timeout_ms: u64,
    /// Readiness timeout when a document gives none.
    pub default_readiness_timeout_ms: u64,
    /// Bound on a single `inject` call.
    pub dispatch_timeout_ms: u64,
    /// Bound on a single `teardown` call.
    pub teardown_timeout_ms: u64,
    /// Added to the sum of phase timeouts to form the case timeout.
    pub case_timeout_grace_ms: u64,
    /// Only suites whose path contains this text are run. Empty runs all.
    pub suite_filter: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            test_dir: "system-tests".to_owned(),
            results_dir: "build/system-test-results".to_owned(),
            stop_on_first_failure: false,
            parallel_cases: 1,
            default_expectation_timeout_ms: 5_000,
            default_readiness_timeout_ms: 30_000,
            dispatch_timeout_ms: 10_000,
            teardown_timeout_ms: 30_000,
            case_timeout_grace_ms: 1_000,
            suite_filter: String::new(),
        }
    }
}

/// `[docker]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path. Empty uses the platform default.
    pub socket: String,
    /// Network containers are attached to. Empty uses the daemon default.
    pub network: String,
    /// Pull images before creating containers.
    pub pull_images: bool,
    /// Prefix for container names and labels.
    pub label_prefix: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: String::new(),
            network: String::new(),
            pull_images: false,
            label_prefix: "systest".to_owned(),
        }
    }
}

/// `[metrics]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Register metric descriptions at startup.
    pub enabled: bool,
}

// --- env override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
