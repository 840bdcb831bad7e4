//! Executor tuning.

use std::time::Duration;

use systest_core::config::ExecutorConfig;

/// Run-wide settings. Per-item timeouts live in the suite itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Mark every case after the first non-passing one as aborted.
    pub stop_on_first_failure: bool,
    /// Cases run at once. `1` runs them in declaration order.
    pub parallel_cases: usize,
    /// Bound on one `inject` call.
    pub dispatch_timeout: Duration,
    /// Bound on one `teardown` call.
    pub teardown_timeout: Duration,
    /// Slack added on top of the summed phase timeouts.
    pub case_timeout_grace: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            stop_on_first_failure: config.stop_on_first_failure,
            parallel_cases: config.parallel_cases.max(1),
            dispatch_timeout: Duration::from_millis(config.dispatch_timeout_ms),
            teardown_timeout: Duration::from_millis(config.teardown_timeout_ms),
            case_timeout_grace: Duration::from_millis(config.case_timeout_grace_ms),
        }
    }

    pub fn with_stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    pub fn with_parallel_cases(mut self, n: usize) -> Self {
        self.parallel_cases = n.max(1);
        self
    }
}
