//! Mock provider for E2E tests.
//!
//! Behavior is read from each service's `config` block, so a suite
//! document fully describes what its services do:
//!
//! ```yaml
//! services:
//!   echo:
//!     kind: mock
//!     config:
//!       echo_delay_ms: 50        # inject → record on the same channel
//!       script:                  # records emitted at fixed case offsets
//!         - {at_ms: 100, payload: ready}
//!       fail_provision: false
//!       panic_on_inject: false
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use systest_core::error::ProviderError;
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{InstanceId, Observation, Provider, RecordStream};

/// What one mock service does. Everything defaults to "well behaved".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Behavior {
    pub provision_delay_ms: u64,
    pub fail_provision: bool,
    pub never_ready: bool,
    pub fail_dispatch: bool,
    pub panic_on_inject: bool,
    pub hang_capture: bool,
    pub fail_teardown: bool,
    /// Echo every input back after this delay.
    pub echo_delay_ms: Option<u64>,
    pub script: Vec<Scripted>,
}

/// A record emitted `at_ms` after capture starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scripted {
    pub at_ms: u64,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub payload: Value,
}

fn default_channel() -> String {
    "out".to_owned()
}

/// Call counters shared between a registered provider and the test.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    provision_calls: Arc<AtomicUsize>,
    provisioned: Arc<AtomicUsize>,
    torn_down: Arc<AtomicUsize>,
    injected: Arc<AtomicUsize>,
    instances: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Stats {
    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    /// Provision calls that returned a handle.
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    /// Instance names in provisioning order.
    pub fn instances(&self) -> Vec<String> {
        self.instances.lock().unwrap().clone()
    }
}

/// Provider whose services follow their [`Behavior`].
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    kind: String,
    pub stats: Stats,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            stats: Stats::default(),
        }
    }
}

pub struct MockHandle {
    service: String,
    behavior: Behavior,
    /// Sender of the active capture, used for echoes.
    outbox: Mutex<Option<mpsc::Sender<Observation>>>,
}

impl MockHandle {
    fn outbox(&self) -> Option<mpsc::Sender<Observation>> {
        self.outbox.lock().unwrap().clone()
    }
}

impl Provider for MockProvider {
    type Handle = MockHandle;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn provision(
        &self,
        id: &InstanceId,
        definition: &ServiceDefinition,
    ) -> Result<MockHandle, ProviderError> {
        self.stats.provision_calls.fetch_add(1, Ordering::SeqCst);
        let behavior: Behavior = serde_json::from_value(definition.config.clone()).map_err(|e| {
            ProviderError::InvalidConfig {
                service: id.service.clone(),
                reason: e.to_string(),
            }
        })?;

        if behavior.provision_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(behavior.provision_delay_ms)).await;
        }
        if behavior.fail_provision {
            return Err(ProviderError::Provisioning {
                service: id.service.clone(),
                reason: "mock refused to start".to_owned(),
            });
        }

        self.stats.provisioned.fetch_add(1, Ordering::SeqCst);
        self.stats
            .instances
            .lock()
            .unwrap()
            .push(id.instance.clone());
        Ok(MockHandle {
            service: id.service.clone(),
            behavior,
            outbox: Mutex::new(None),
        })
    }

    async fn await_ready(
        &self,
        handle: &MockHandle,
        _probe: &ReadinessProbe,
    ) -> Result<(), ProviderError> {
        if handle.behavior.never_ready {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn inject(&self, handle: &MockHandle, input: &Input) -> Result<(), ProviderError> {
        self.stats.injected.fetch_add(1, Ordering::SeqCst);
        if handle.behavior.panic_on_inject {
            panic!("mock provider panicked on inject");
        }
        if handle.behavior.fail_dispatch {
            return Err(ProviderError::Dispatch {
                service: handle.service.clone(),
                reason: "connection refused".to_owned(),
            });
        }

        if let (Some(delay), Some(tx)) = (handle.behavior.echo_delay_ms, handle.outbox()) {
            let echo = Observation::new(
                input.channel.clone().unwrap_or_else(default_channel),
                input.payload.clone(),
            );
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let _ = tx.send(echo).await;
            });
        }
        Ok(())
    }

    async fn capture(
        &self,
        handle: &MockHandle,
        since: Instant,
    ) -> Result<RecordStream, ProviderError> {
        if handle.behavior.hang_capture {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::channel(64);
        for scripted in handle.behavior.script.clone() {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(since + Duration::from_millis(scripted.at_ms)).await;
                let _ = tx
                    .send(Observation::new(scripted.channel, scripted.payload))
                    .await;
            });
        }
        *handle.outbox.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn teardown(&self, handle: MockHandle) -> Result<(), ProviderError> {
        self.stats.torn_down.fetch_add(1, Ordering::SeqCst);
        if handle.behavior.fail_teardown {
            return Err(ProviderError::Teardown {
                service: handle.service,
                reason: "instance already gone".to_owned(),
            });
        }
        Ok(())
    }
}
