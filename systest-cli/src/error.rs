//! CLI-specific error types and exit code mapping

use systest_core::error::{ParseError, SystestError};
use systest_executor::ExecutorError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A test package could not be loaded.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The run finished but not every case passed.
    #[error("{failed} failed, {errored} errored of {total} case(s)")]
    TestsFailed {
        total: usize,
        failed: usize,
        errored: usize,
    },

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Results could not be written.
    #[error("{0}")]
    Results(#[from] ExecutorError),

    /// Wrapped domain error from systest-core.
    #[error("{0}")]
    Core(#[from] SystestError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                 |
    /// |------|-----------------------------------------|
    /// | 0    | Every case passed                       |
    /// | 1    | Failing cases / general command error   |
    /// | 2    | Configuration or test definition error  |
    /// | 10   | IO error                                |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Parse(_) => 2,
            Self::Io(_) => 10,
            Self::Results(ExecutorError::Write { .. }) => 10,
            Self::Core(SystestError::Config(_) | SystestError::Parse(_)) => 2,
            Self::Core(SystestError::Io(_)) => 10,
            Self::TestsFailed { .. }
            | Self::Command(_)
            | Self::JsonSerialize(_)
            | Self::Results(_)
            | Self::Core(_) => 1,
        }
    }
}
