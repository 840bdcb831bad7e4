//! Provider SPI: how a service kind is provisioned, driven and observed.
//!
//! [`Provider`] is the trait implementors write. It uses RPITIT and an
//! associated handle type, so it is not object safe. [`DynProvider`] is the
//! boxed-future twin the registry stores, with handles erased into
//! [`ErasedHandle`]. Every `Provider` gets `DynProvider` for free.
//!
//! # Lifecycle of a handle
//! ```text
//! provision() → await_ready() → inject()* / capture() → teardown()
//! ```
//! `teardown` consumes the handle, so it runs at most once.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::model::{Input, ReadinessProbe, ServiceDefinition};

/// Boxed future used by the dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output emitted by a service, before the executor timestamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub channel: String,
    pub payload: Value,
}

impl Observation {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Builds an observation from a text line: JSON when it parses, a string otherwise.
    pub fn from_line(channel: impl Into<String>, line: &str) -> Self {
        let payload = serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_owned()));
        Self::new(channel, payload)
    }
}

/// Receiving end of a capture. Closing the sender ends the sequence.
pub type RecordStream = mpsc::Receiver<Observation>;

/// Identity of a provisioned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId {
    /// Logical service name from the suite.
    pub service: String,
    /// Unique name for this run, e.g. `echo-3`.
    pub instance: String,
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service, self.instance)
    }
}

// ─── Provider Trait ──────────────────────────────────────────────────

/// Capability set for one service kind.
///
/// # Example
/// ```ignore
/// struct EchoProvider;
///
/// impl Provider for EchoProvider {
///     type Handle = EchoHandle;
///
///     fn kind(&self) -> &str { "echo" }
///
///     async fn provision(&self, id: &InstanceId, def: &ServiceDefinition)
///         -> Result<EchoHandle, ProviderError> { /* ... */ }
///     async fn inject(&self, h: &EchoHandle, input: &Input) -> Result<(), ProviderError> { /* ... */ }
///     async fn capture(&self, h: &EchoHandle, since: Instant) -> Result<RecordStream, ProviderError> { /* ... */ }
///     async fn teardown(&self, h: EchoHandle) -> Result<(), ProviderError> { /* ... */ }
/// }
/// ```
pub trait Provider: Send + Sync + 'static {
    /// Live runtime handle for one provisioned instance.
    type Handle: Send + Sync + 'static;

    /// Kind tag this provider serves.
    fn kind(&self) -> &str;

    /// Starts an instance of `definition`.
    fn provision(
        &self,
        id: &InstanceId,
        definition: &ServiceDefinition,
    ) -> impl Future<Output = Result<Self::Handle, ProviderError>> + Send;

    /// Resolves once the instance satisfies `probe`.
    ///
    /// The executor bounds the wait by `probe.timeout`. The default reports
    /// ready immediately.
    fn await_ready(
        &self,
        handle: &Self::Handle,
        probe: &ReadinessProbe,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        let _ = (handle, probe);
        async { Ok(()) }
    }

    /// Delivers one input.
    fn inject(
        &self,
        handle: &Self::Handle,
        input: &Input,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Starts streaming output emitted at or after `since`.
    ///
    /// The stream is lazy; the executor decides how long to read it.
    fn capture(
        &self,
        handle: &Self::Handle,
        since: Instant,
    ) -> impl Future<Output = Result<RecordStream, ProviderError>> + Send;

    /// Releases the instance.
    fn teardown(
        &self,
        handle: Self::Handle,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

// ─── ErasedHandle ────────────────────────────────────────────────────

/// A provider handle with its concrete type erased.
pub struct ErasedHandle {
    kind: String,
    id: InstanceId,
    inner: Box<dyn Any + Send + Sync>,
}

impl ErasedHandle {
    pub fn new<H: Send + Sync + 'static>(kind: impl Into<String>, id: InstanceId, inner: H) -> Self {
        Self {
            kind: kind.into(),
            id,
            inner: Box::new(inner),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn service(&self) -> &str {
        &self.id.service
    }

    /// Borrows the concrete handle.
    pub fn downcast_ref<H: 'static>(&self) -> Result<&H, ProviderError> {
        self.inner
            .downcast_ref::<H>()
            .ok_or_else(|| self.mismatch())
    }

    /// Takes the concrete handle back.
    pub fn into_inner<H: 'static>(self) -> Result<H, ProviderError> {
        let mismatch = self.mismatch();
        self.inner
            .downcast::<H>()
            .map(|boxed| *boxed)
            .map_err(|_| mismatch)
    }

    fn mismatch(&self) -> ProviderError {
        ProviderError::HandleMismatch {
            service: self.id.service.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Debug for ErasedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedHandle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ─── DynProvider Trait ───────────────────────────────────────────────

/// dyn-compatible provider.
///
/// `Provider` uses RPITIT and an associated type, so `dyn Provider` is not
/// possible. The registry stores `Arc<dyn DynProvider>` instead.
pub trait DynProvider: Send + Sync {
    fn kind(&self) -> &str;

    fn provision<'a>(
        &'a self,
        id: &'a InstanceId,
        definition: &'a ServiceDefinition,
    ) -> BoxFuture<'a, Result<ErasedHandle, ProviderError>>;

    fn await_ready<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        probe: &'a ReadinessProbe,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    fn inject<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        input: &'a Input,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    fn capture<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        since: Instant,
    ) -> BoxFuture<'a, Result<RecordStream, ProviderError>>;

    fn teardown(&self, handle: ErasedHandle) -> BoxFuture<'_, Result<(), ProviderError>>;
}

impl<P: Provider> DynProvider for P {
    fn kind(&self) -> &str {
        Provider::kind(self)
    }

    fn provision<'a>(
        &'a self,
        id: &'a InstanceId,
        definition: &'a ServiceDefinition,
    ) -> BoxFuture<'a, Result<ErasedHandle, ProviderError>> {
        Box::pin(async move {
            let handle = Provider::provision(self, id, definition).await?;
            Ok(ErasedHandle::new(Provider::kind(self), id.clone(), handle))
        })
    }

    fn await_ready<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        probe: &'a ReadinessProbe,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let inner = handle.downcast_ref::<P::Handle>()?;
            Provider::await_ready(self, inner, probe).await
        })
    }

    fn inject<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        input: &'a Input,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let inner = handle.downcast_ref::<P::Handle>()?;
            Provider::inject(self, inner, input).await
        })
    }

    fn capture<'a>(
        &'a self,
        handle: &'a ErasedHandle,
        since: Instant,
    ) -> BoxFuture<'a, Result<RecordStream, ProviderError>> {
        Box::pin(async move {
            let inner = handle.downcast_ref::<P::Handle>()?;
            Provider::capture(self, inner, since).await
        })
    }

    fn teardown(&self, handle: ErasedHandle) -> BoxFuture<'_, Result<(), ProviderError>> {
        Box::pin(async move {
            let inner = handle.into_inner::<P::Handle>()?;
            Provider::teardown(self, inner).await
        })
    }
}
