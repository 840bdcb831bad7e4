//! Per-case execution environment.
//!
//! An [`ExecutionEnvironment`] owns every live handle of one case and is the
//! single place they are released. Provisioning runs in tasks owned by the
//! environment: a handle is adopted the moment `provision` returns, even if
//! the case has already given up waiting for it, so [`teardown_all`]
//! releases exactly what was provisioned.
//!
//! [`teardown_all`]: ExecutionEnvironment::teardown_all

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use systest_core::error::ProviderError;
use systest_core::metrics::{LABEL_KIND, PROVIDER_CRASHES_TOTAL, TEARDOWN_FAILURES_TOTAL};
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{DynProvider, ErasedHandle, InstanceId, RecordStream};

use crate::verdict::TeardownWarning;

/// Resolves once provisioning of one service finished, successfully or not.
pub(crate) type ProvisionResult = oneshot::Receiver<Result<(), ProviderError>>;

struct Slot {
    provider: Arc<dyn DynProvider>,
    handle: ErasedHandle,
}

pub(crate) struct ExecutionEnvironment {
    case: String,
    slots: Mutex<Vec<Arc<Slot>>>,
    provisioning: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl ExecutionEnvironment {
    pub(crate) fn new(case: &str) -> Arc<Self> {
        Arc::new(Self {
            case: case.to_owned(),
            slots: Mutex::new(Vec::new()),
            provisioning: Mutex::new(Vec::new()),
        })
    }

    /// Starts provisioning `definition` in a task owned by this environment.
    pub(crate) fn provision(
        self: &Arc<Self>,
        provider: Arc<dyn DynProvider>,
        id: InstanceId,
        definition: Arc<ServiceDefinition>,
    ) -> ProvisionResult {
        let (tx, rx) = oneshot::channel();
        let env = Arc::clone(self);
        let service = id.service.clone();

        let task = tokio::spawn(async move {
            let kind = provider.kind().to_owned();
            let result = guarded(&kind, provider.provision(&id, &definition)).await;
            let result = result.map(|handle| {
                tracing::debug!(
                    case = %env.case,
                    service = %id.service,
                    instance = %id.instance,
                    "service provisioned"
                );
                lock(&env.slots).push(Arc::new(Slot { provider, handle }));
            });
            // the receiver is gone when the case stopped waiting; the handle is adopted anyway
            let _ = tx.send(result);
        });

        lock(&self.provisioning).push((service, task));
        rx
    }

    /// Number of handles currently held.
    pub(crate) fn provisioned(&self) -> usize {
        lock(&self.slots).len()
    }

    pub(crate) async fn await_ready(
        &self,
        service: &str,
        probe: &ReadinessProbe,
    ) -> Result<(), ProviderError> {
        let slot = self.slot(service)?;
        guarded(
            slot.provider.kind(),
            slot.provider.await_ready(&slot.handle, probe),
        )
        .await
    }

    pub(crate) async fn capture(
        &self,
        service: &str,
        since: Instant,
    ) -> Result<RecordStream, ProviderError> {
        let slot = self.slot(service)?;
        guarded(slot.provider.kind(), slot.provider.capture(&slot.handle, since)).await
    }

    /// Delivers one input, bounded by `timeout`. Returns the provider kind.
    pub(crate) async fn inject(
        &self,
        input: &Input,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let slot = self.slot(&input.service)?;
        let kind = slot.provider.kind();
        match tokio::time::timeout(timeout, guarded(kind, slot.provider.inject(&slot.handle, input)))
            .await
        {
            Ok(result) => result.map(|()| kind.to_owned()),
            Err(_) => Err(ProviderError::Dispatch {
                service: input.service.clone(),
                reason: format!("not delivered within {} ms", timeout.as_millis()),
            }),
        }
    }

    /// Provider kind serving `service`, if it is provisioned.
    pub(crate) fn kind_of(&self, service: &str) -> Option<String> {
        self.slot(service).ok().map(|s| s.provider.kind().to_owned())
    }

    fn slot(&self, service: &str) -> Result<Arc<Slot>, ProviderError> {
        lock(&self.slots)
            .iter()
            .find(|s| s.handle.service() == service)
            .cloned()
            .ok_or_else(|| ProviderError::Provisioning {
                service: service.to_owned(),
                reason: "service is not provisioned".to_owned(),
            })
    }

    /// Releases everything this environment holds.
    ///
    /// Waits for in-flight provisioning first, all tasks together under one
    /// `timeout` deadline, then tears all handles down concurrently, each
    /// call bounded by `timeout`. Problems are returned as warnings.
    pub(crate) async fn teardown_all(&self, timeout: Duration) -> Vec<TeardownWarning> {
        let provisioning = std::mem::take(&mut *lock(&self.provisioning));
        let deadline = Instant::now() + timeout;
        let settled = join_all(
            provisioning
                .into_iter()
                .map(|(service, task)| settle(service, task, deadline, timeout)),
        )
        .await;
        let mut warnings: Vec<TeardownWarning> = settled.into_iter().flatten().collect();

        let slots = std::mem::take(&mut *lock(&self.slots));
        let count = slots.len();
        let results = join_all(slots.into_iter().map(|slot| release(slot, timeout))).await;
        warnings.extend(results.into_iter().flatten());

        for warning in &warnings {
            tracing::warn!(
                case = %self.case,
                service = %warning.service,
                reason = %warning.message,
                "teardown problem"
            );
        }
        tracing::debug!(case = %self.case, released = count, "environment torn down");

        warnings.sort_by(|a, b| a.service.cmp(&b.service));
        warnings
    }
}

/// Waits for a provisioning task until `deadline`, aborting it after.
async fn settle(
    service: String,
    mut task: JoinHandle<()>,
    deadline: Instant,
    timeout: Duration,
) -> Option<TeardownWarning> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(TeardownWarning {
            service,
            message: format!("provisioning task failed: {e}"),
        }),
        Err(_) => {
            task.abort();
            Some(TeardownWarning {
                service,
                message: format!(
                    "provisioning still running after {} ms, abandoned",
                    timeout.as_millis()
                ),
            })
        }
    }
}

async fn release(slot: Arc<Slot>, timeout: Duration) -> Option<TeardownWarning> {
    let Some(Slot { provider, handle }) = Arc::into_inner(slot) else {
        return Some(TeardownWarning {
            service: "<unknown>".to_owned(),
            message: "handle still in use, not torn down".to_owned(),
        });
    };
    let service = handle.service().to_owned();
    let kind = provider.kind().to_owned();

    let message = match tokio::time::timeout(timeout, guarded(&kind, provider.teardown(handle))).await {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("teardown did not finish within {} ms", timeout.as_millis()),
    };
    metrics::counter!(TEARDOWN_FAILURES_TOTAL, LABEL_KIND => kind).increment(1);
    Some(TeardownWarning { service, message })
}

/// Runs a provider call, turning a panic into [`ProviderError::Crashed`].
pub(crate) async fn guarded<T>(
    kind: &str,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(kind = kind, reason = %reason, "provider panicked");
            metrics::counter!(PROVIDER_CRASHES_TOTAL, LABEL_KIND => kind.to_owned()).increment(1);
            Err(ProviderError::Crashed {
                kind: kind.to_owned(),
                reason,
            })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_owned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
