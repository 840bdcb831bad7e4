//! `process` provider: a local child process per service.
//!
//! ```yaml
//! services:
//!   worker:
//!     kind: process
//!     config:
//!       command: ./worker
//!       args: [--port, "0"]
//!       env: {RUST_LOG: debug}
//!       working_dir: build
//!       stop_timeout_ms: 2000
//! ```
//!
//! Inputs are written to stdin, one line per input. stdout lines arrive on
//! channel `out`, stderr lines on `err`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use systest_core::error::ProviderError;
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{InstanceId, Observation, Provider, RecordStream};

use crate::error::ProviderConfigError;
use crate::output::OutputBuffer;
use crate::spec;

const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;

/// `config` block of a `process` service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Grace period between closing stdin and killing the process.
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,
}

/// Runs each service as a child process of the executor.
#[derive(Debug, Clone, Default)]
pub struct ProcessProvider;

impl ProcessProvider {
    pub fn new() -> Self {
        Self
    }
}

pub struct ProcessHandle {
    service: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    output: Arc<OutputBuffer>,
    readers: JoinHandle<()>,
    stop_timeout: Duration,
}

impl Provider for ProcessProvider {
    type Handle = ProcessHandle;

    fn kind(&self) -> &str {
        "process"
    }

    async fn provision(
        &self,
        id: &InstanceId,
        definition: &ServiceDefinition,
    ) -> Result<ProcessHandle, ProviderError> {
        let spec: ProcessSpec = spec::parse(&id.service, &definition.config)?;
        if spec.command.trim().is_empty() {
            return Err(ProviderConfigError::MissingField {
                service: id.service.clone(),
                field: "command",
            }
            .into());
        }

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env("SYSTEST_INSTANCE", &id.instance)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| ProviderError::Provisioning {
            service: id.service.clone(),
            reason: format!("failed to spawn '{}': {e}", spec.command),
        })?;
        let pid = child.id();
        tracing::debug!(
            service = %id.service,
            instance = %id.instance,
            command = %spec.command,
            pid = pid,
            "process started"
        );

        let output = Arc::new(OutputBuffer::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let readers = {
            let output = Arc::clone(&output);
            tokio::spawn(async move {
                tokio::join!(
                    pump(stdout, "out", &output),
                    pump(stderr, "err", &output)
                );
                output.close();
            })
        };

        Ok(ProcessHandle {
            service: id.service.clone(),
            pid,
            stdin: Mutex::new(child.stdin.take()),
            child: Mutex::new(child),
            output,
            readers,
            stop_timeout: Duration::from_millis(
                spec.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
        })
    }

    async fn await_ready(
        &self,
        handle: &ProcessHandle,
        probe: &ReadinessProbe,
    ) -> Result<(), ProviderError> {
        if let Some(needle) = &probe.output_contains {
            if !handle.output.wait_for(needle).await {
                return Err(exited_early(handle, &format!("before printing '{needle}'")).await);
            }
        }

        let status = handle
            .child
            .lock()
            .await
            .try_wait()
            .map_err(|e| ProviderError::Provisioning {
                service: handle.service.clone(),
                reason: e.to_string(),
            })?;
        match status {
            Some(status) => Err(ProviderError::Provisioning {
                service: handle.service.clone(),
                reason: format!("process exited during startup ({status})"),
            }),
            None => Ok(()),
        }
    }

    async fn inject(&self, handle: &ProcessHandle, input: &Input) -> Result<(), ProviderError> {
        let mut line = input.payload_text();
        line.push('\n');

        let mut stdin = handle.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(ProviderError::Dispatch {
                service: handle.service.clone(),
                reason: "stdin is closed".to_owned(),
            });
        };
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        };
        written.await.map_err(|e| ProviderError::Dispatch {
            service: handle.service.clone(),
            reason: e.to_string(),
        })
    }

    async fn capture(
        &self,
        handle: &ProcessHandle,
        since: Instant,
    ) -> Result<RecordStream, ProviderError> {
        Ok(handle.output.subscribe_from(since))
    }

    async fn teardown(&self, handle: ProcessHandle) -> Result<(), ProviderError> {
        // closing stdin is the polite stop signal
        drop(handle.stdin.lock().await.take());

        let mut child = handle.child.lock().await;
        let result = match tokio::time::timeout(handle.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(service = %handle.service, pid = handle.pid, %status, "process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => {
                tracing::debug!(service = %handle.service, pid = handle.pid, "process did not stop, killing");
                child.kill().await.map_err(|e| e.to_string())
            }
        };
        handle.readers.abort();
        handle.output.close();

        result.map_err(|reason| ProviderError::Teardown {
            service: handle.service.clone(),
            reason,
        })
    }
}

/// Forwards lines from one pipe into `output`.
async fn pump<R>(pipe: Option<R>, channel: &str, output: &OutputBuffer)
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => output.push(Observation::from_line(channel, &line)),
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(channel = channel, error = %e, "output pipe failed");
                return;
            }
        }
    }
}

async fn exited_early(handle: &ProcessHandle, when: &str) -> ProviderError {
    let status = handle.child.lock().await.wait().await;
    let status = match status {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    };
    ProviderError::Provisioning {
        service: handle.service.clone(),
        reason: format!("process exited {when} ({status})"),
    }
}
