//! Provider error types.
//!
//! [`ProviderConfigError`] covers unusable service definitions and
//! [`DockerError`] covers Docker API failures. Both convert into the core
//! [`ProviderError`] so they can travel out of a provider call, and from
//! there into [`SystestError`].

use systest_core::error::{ProviderError, SystestError};

/// A service definition that a built-in provider cannot use.
#[derive(Debug, thiserror::Error)]
pub enum ProviderConfigError {
    /// A required `config` key is absent
    #[error("service '{service}': missing config field '{field}'")]
    MissingField {
        service: String,
        field: &'static str,
    },

    /// A `config` key has the wrong shape or value
    #[error("service '{service}': invalid config: {reason}")]
    Invalid { service: String, reason: String },
}

impl ProviderConfigError {
    pub fn service(&self) -> &str {
        match self {
            Self::MissingField { service, .. } | Self::Invalid { service, .. } => service,
        }
    }
}

impl From<ProviderConfigError> for ProviderError {
    fn from(err: ProviderConfigError) -> Self {
        ProviderError::InvalidConfig {
            service: err.service().to_owned(),
            reason: err.to_string(),
        }
    }
}

impl From<ProviderConfigError> for SystestError {
    fn from(err: ProviderConfigError) -> Self {
        SystestError::Provider(err.into())
    }
}

/// Docker daemon errors.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    /// The daemon could not be reached
    #[error("docker connection error: {0}")]
    Connection(String),

    /// An API call failed
    #[error("docker {operation} failed: {reason}")]
    Api {
        operation: &'static str,
        reason: String,
    },

    /// The container does not exist
    #[error("container not found: {0}")]
    NotFound(String),
}

impl DockerError {
    pub(crate) fn api(operation: &'static str, err: impl std::fmt::Display) -> Self {
        let reason = err.to_string();
        if reason.contains("404") {
            return Self::NotFound(reason);
        }
        Self::Api { operation, reason }
    }
}

impl From<DockerError> for SystestError {
    fn from(err: DockerError) -> Self {
        SystestError::Provider(ProviderError::Provisioning {
            service: "docker".to_owned(),
            reason: err.to_string(),
        })
    }
}
