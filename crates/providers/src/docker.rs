//! `docker` provider: one container per service.
//!
//! The [`DockerClient`] trait abstracts the bollard Docker API, allowing
//! production code to use [`BollardDockerClient`] while tests use `MockDockerClient`.
//!
//! ```text
//! ┌────────────────┐
//! │ DockerProvider │
//! └───────┬────────┘
//!         │
//!         ▼
//!  ┌─────────────┐
//!  │DockerClient │ (trait)
//!  └─────────────┘
//!       │     │
//!       ▼     ▼
//!  ┌───────┐ ┌────┐
//!  │Bollard│ │Mock│
//!  └───┬───┘ └────┘
//!      │
//!      ▼
//!  Docker Daemon
//! ```
//!
//! ```yaml
//! services:
//!   db:
//!     kind: docker
//!     readiness:
//!       output_contains: ready to accept connections
//!     config:
//!       image: postgres:16
//!       env: {POSTGRES_PASSWORD: test}
//! ```
//!
//! Containers are named `{label_prefix}-{run_id}-{instance}` and labelled
//! with the run id and service, so leftovers of a crashed run are easy to
//! find. Inputs are written to the attached stdin; stdout and stderr lines
//! arrive on `out` and `err`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use systest_core::config::DockerConfig;
use systest_core::error::ProviderError;
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{InstanceId, Observation, Provider, RecordStream};

use crate::error::DockerError;
use crate::output::OutputBuffer;
use crate::spec;

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
}

/// A chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// `out` or `err`.
    pub channel: &'static str,
    pub bytes: Bytes,
}

pub type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputChunk, DockerError>> + Send>>;

/// The two ends of an attached container.
pub struct Attachment {
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: OutputStream,
}

/// Trait abstracting the Docker API calls the provider needs.
///
/// # Implementations
///
/// - [`BollardDockerClient`]: Production implementation using the `bollard` library
/// - `MockDockerClient`: Test implementation with scripted output (available in tests only)
pub trait DockerClient: Send + Sync + 'static {
    /// Pulls `image` from its registry.
    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), DockerError>> + Send;

    /// Creates a stopped container. Returns its id.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, DockerError>> + Send;

    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), DockerError>> + Send;

    /// Attaches to stdin, stdout and stderr, including output logged so far.
    fn attach_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Attachment, DockerError>> + Send;

    fn is_running(&self, id: &str) -> impl Future<Output = Result<bool, DockerError>> + Send;

    /// Force-removes a container and its anonymous volumes.
    fn remove_container(&self, id: &str) -> impl Future<Output = Result<(), DockerError>> + Send;

    /// Checks Docker daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), DockerError>> + Send;
}

/// Production Docker client implementation using `bollard`.
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDockerClient {
    /// Connects using the platform's default socket.
    pub fn connect_local() -> Result<Self, DockerError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::Connection(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects using a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, DockerError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    DockerError::Connection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to `config.socket`, or the default socket when it is empty.
    pub fn from_config(config: &DockerConfig) -> Result<Self, DockerError> {
        if config.socket.is_empty() {
            Self::connect_local()
        } else {
            Self::connect_with_socket(&config.socket)
        }
    }
}

impl DockerClient for BollardDockerClient {
    async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        use bollard::image::CreateImageOptions;

        let options = CreateImageOptions {
            from_image: image.to_owned(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| DockerError::api("pull", e))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::HostConfig;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            tty: Some(false),
            host_config: Some(HostConfig {
                network_mode: spec.network.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DockerError::api("create", e))?;
        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, warning = %warning, "docker create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        use bollard::container::StartContainerOptions;

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::api("start", e))
    }

    async fn attach_container(&self, id: &str) -> Result<Attachment, DockerError> {
        use bollard::container::{AttachContainerOptions, LogOutput};

        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let attached = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| DockerError::api("attach", e))?;

        let output = attached.output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputChunk {
                        channel: "out",
                        bytes: message,
                    }))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk {
                    channel: "err",
                    bytes: message,
                })),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(DockerError::api("attach", e))),
            }
        });
        Ok(Attachment {
            input: attached.input,
            output: Box::pin(output),
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool, DockerError> {
        use bollard::container::InspectContainerOptions;

        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DockerError::api("inspect", e))?;
        Ok(details.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerError> {
        use bollard::container::RemoveContainerOptions;

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| DockerError::api("remove", e))
    }

    async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::Connection(format!("ping failed: {e}")))?;
        Ok(())
    }
}

// ─── Provider ────────────────────────────────────────────────────────

/// `config` block of a `docker` service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerSpec {
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Runs each service as a container.
pub struct DockerProvider<C: DockerClient> {
    client: Arc<C>,
    config: DockerConfig,
    run_id: Uuid,
}

impl<C: DockerClient> DockerProvider<C> {
    pub fn new(client: Arc<C>, config: DockerConfig, run_id: Uuid) -> Self {
        Self {
            client,
            config,
            run_id,
        }
    }

    /// Container name for `id` in this run.
    pub fn container_name(&self, id: &InstanceId) -> String {
        let raw = format!("{}-{}-{}", self.config.label_prefix, self.run_id, id.instance);
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    fn container_spec(&self, id: &InstanceId, spec: DockerSpec) -> ContainerSpec {
        let prefix = &self.config.label_prefix;
        let labels = HashMap::from([
            (format!("{prefix}.run_id"), self.run_id.to_string()),
            (format!("{prefix}.service"), id.service.clone()),
            (format!("{prefix}.instance"), id.instance.clone()),
        ]);
        ContainerSpec {
            name: self.container_name(id),
            image: spec.image,
            cmd: spec.cmd,
            env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels,
            network: (!self.config.network.is_empty()).then(|| self.config.network.clone()),
        }
    }

    async fn start(&self, service: &str, container: &ContainerSpec) -> Result<DockerHandle, ProviderError> {
        let failed = |e: DockerError| ProviderError::Provisioning {
            service: service.to_owned(),
            reason: e.to_string(),
        };

        let id = self.client.create_container(container).await.map_err(failed)?;
        // attach before start so early output is not lost
        let started = async {
            let attachment = self.client.attach_container(&id).await?;
            self.client.start_container(&id).await?;
            Ok::<_, DockerError>(attachment)
        };
        let attachment = match started.await {
            Ok(attachment) => attachment,
            Err(e) => {
                if let Err(cleanup) = self.client.remove_container(&id).await {
                    tracing::warn!(container = %container.name, error = %cleanup, "failed to remove container after start failure");
                }
                return Err(failed(e));
            }
        };

        let output = Arc::new(OutputBuffer::new());
        let pump = tokio::spawn(pump(attachment.output, Arc::clone(&output)));
        Ok(DockerHandle {
            service: service.to_owned(),
            id,
            name: container.name.clone(),
            stdin: Mutex::new(attachment.input),
            output,
            pump,
        })
    }
}

pub struct DockerHandle {
    service: String,
    id: String,
    name: String,
    stdin: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    output: Arc<OutputBuffer>,
    pump: JoinHandle<()>,
}

impl DockerHandle {
    pub fn container_id(&self) -> &str {
        &self.id
    }

    pub fn container_name(&self) -> &str {
        &self.name
    }
}

impl<C: DockerClient> Provider for DockerProvider<C> {
    type Handle = DockerHandle;

    fn kind(&self) -> &str {
        "docker"
    }

    async fn provision(
        &self,
        id: &InstanceId,
        definition: &ServiceDefinition,
    ) -> Result<DockerHandle, ProviderError> {
        let spec: DockerSpec = spec::parse(&id.service, &definition.config)?;
        let container = self.container_spec(id, spec);

        if self.config.pull_images {
            tracing::debug!(service = %id.service, image = %container.image, "pulling image");
            self.client
                .pull_image(&container.image)
                .await
                .map_err(|e| ProviderError::Provisioning {
                    service: id.service.clone(),
                    reason: e.to_string(),
                })?;
        }

        let handle = self.start(&id.service, &container).await?;
        tracing::debug!(
            service = %id.service,
            container = %handle.name,
            image = %container.image,
            "container started"
        );
        Ok(handle)
    }

    async fn await_ready(
        &self,
        handle: &DockerHandle,
        probe: &ReadinessProbe,
    ) -> Result<(), ProviderError> {
        if let Some(needle) = &probe.output_contains {
            if !handle.output.wait_for(needle).await {
                return Err(ProviderError::Provisioning {
                    service: handle.service.clone(),
                    reason: format!("container output ended before '{needle}'"),
                });
            }
        }
        let running = self
            .client
            .is_running(&handle.id)
            .await
            .map_err(|e| ProviderError::Provisioning {
                service: handle.service.clone(),
                reason: e.to_string(),
            })?;
        if !running {
            return Err(ProviderError::Provisioning {
                service: handle.service.clone(),
                reason: format!("container {} is not running", handle.name),
            });
        }
        Ok(())
    }

    async fn inject(&self, handle: &DockerHandle, input: &Input) -> Result<(), ProviderError> {
        let mut line = input.payload_text();
        line.push('\n');
        let mut stdin = handle.stdin.lock().await;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        written.await.map_err(|e| ProviderError::Dispatch {
            service: handle.service.clone(),
            reason: e.to_string(),
        })
    }

    async fn capture(
        &self,
        handle: &DockerHandle,
        since: Instant,
    ) -> Result<RecordStream, ProviderError> {
        Ok(handle.output.subscribe_from(since))
    }

    async fn teardown(&self, handle: DockerHandle) -> Result<(), ProviderError> {
        handle.pump.abort();
        handle.output.close();
        match self.client.remove_container(&handle.id).await {
            Ok(()) => {
                tracing::debug!(service = %handle.service, container = %handle.name, "container removed");
                Ok(())
            }
            Err(DockerError::NotFound(_)) => {
                tracing::debug!(container = %handle.name, "container already gone");
                Ok(())
            }
            Err(e) => Err(ProviderError::Teardown {
                service: handle.service,
                reason: e.to_string(),
            }),
        }
    }
}

/// Splits attached output into lines and feeds `output`.
async fn pump(mut stream: OutputStream, output: Arc<OutputBuffer>) {
    let mut lines = LineSplitter::default();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                for line in lines.feed(chunk.channel, &chunk.bytes) {
                    output.push(Observation::from_line(chunk.channel, &line));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "container output stream failed");
                break;
            }
        }
    }
    for (channel, line) in lines.finish() {
        output.push(Observation::from_line(channel, &line));
    }
    output.close();
}

/// Reassembles lines that span chunks, per channel.
#[derive(Default)]
struct LineSplitter {
    pending: BTreeMap<&'static str, Vec<u8>>,
}

impl LineSplitter {
    fn feed(&mut self, channel: &'static str, bytes: &[u8]) -> Vec<String> {
        let buf = self.pending.entry(channel).or_default();
        buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let rest = buf.split_off(pos + 1);
            let line = std::mem::replace(buf, rest);
            lines.push(decode(&line));
        }
        lines
    }

    /// Unterminated trailing lines.
    fn finish(self) -> Vec<(&'static str, String)> {
        self.pending
            .into_iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(channel, buf)| (channel, decode(&buf)))
            .collect()
    }
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\n', '\r'])
        .to_owned()
}
