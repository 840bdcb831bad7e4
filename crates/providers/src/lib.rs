//! # systest-providers
//!
//! Built-in service kinds:
//!
//! - [`process`]: a local child process, driven through stdin/stdout/stderr
//! - [`docker`]: a container created through the Docker API ([`bollard`])
//! - [`http`]: an already-running HTTP endpoint ([`reqwest`])
//!
//! [`register_builtin`] adds all three to a registry.
//!
//! # Example
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! systest_providers::register_builtin(&mut registry, &config.docker, run_id)?;
//! let executor = SuiteExecutor::new(Arc::new(registry), options).with_run_id(run_id);
//! ```

pub mod docker;
pub mod error;
pub mod http;
pub mod output;
pub mod process;
mod spec;

use std::sync::Arc;

use systest_core::config::DockerConfig;
use systest_core::error::SystestError;
use systest_core::registry::ProviderRegistry;
use uuid::Uuid;

pub use docker::{BollardDockerClient, DockerClient, DockerProvider};
pub use error::{DockerError, ProviderConfigError};
pub use http::HttpProvider;
pub use output::OutputBuffer;
pub use process::ProcessProvider;

/// Kinds [`register_builtin`] can provide, sorted.
pub const BUILTIN_KINDS: [&str; 3] = ["docker", "http", "process"];

/// Registers `process`, `http` and, when a Docker client can be created,
/// `docker`.
///
/// Without Docker, cases that use docker services error at provisioning
/// with an unknown-kind cause; everything else still runs.
pub fn register_builtin(
    registry: &mut ProviderRegistry,
    docker: &DockerConfig,
    run_id: Uuid,
) -> Result<(), SystestError> {
    registry.register("process", ProcessProvider::new())?;
    registry.register("http", HttpProvider::new())?;

    match BollardDockerClient::from_config(docker) {
        Ok(client) => {
            registry.register(
                "docker",
                DockerProvider::new(Arc::new(client), docker.clone(), run_id),
            )?;
        }
        Err(e) => {
            tracing::warn!(error = %e, "docker unavailable, docker services will not run");
        }
    }
    Ok(())
}
