//! Executor error types.
//!
//! Case-scoped failures never surface as errors: they become part of the
//! case's [`Verdict`](crate::verdict::Verdict). [`ExecutorError`] only covers
//! writing results.

use systest_core::error::SystestError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Results file could not be written
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Report could not be serialized
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<ExecutorError> for SystestError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Write { source, .. } => SystestError::Io(source),
            ExecutorError::Serialize(e) => SystestError::Io(std::io::Error::other(e)),
        }
    }
}
