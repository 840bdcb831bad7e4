//! Provider registry: maps a kind tag to the provider that serves it.
//!
//! Built once at startup with [`ProviderRegistry::register`], then shared
//! read-only (`Arc<ProviderRegistry>`) by the executor and every case task.
//!
//! # Example
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry.register("process", ProcessProvider::new())?;
//! registry.register("docker", DockerProvider::new(client, docker_config))?;
//!
//! let provider = registry.resolve("docker")?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::provider::DynProvider;

/// Kind tag → provider lookup table.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn DynProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `kind`.
    ///
    /// Returns `AlreadyRegistered` if the kind is taken.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        provider: impl DynProvider + 'static,
    ) -> Result<(), RegistryError> {
        self.register_shared(kind, Arc::new(provider))
    }

    /// Registers an already shared provider, e.g. one kind served under two tags.
    pub fn register_shared(
        &mut self,
        kind: impl Into<String>,
        provider: Arc<dyn DynProvider>,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.providers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered { kind });
        }
        tracing::debug!(kind = %kind, provider = provider.kind(), "provider registered");
        self.providers.insert(kind, provider);
        Ok(())
    }

    /// Removes the provider for `kind` and returns it.
    pub fn unregister(&mut self, kind: &str) -> Result<Arc<dyn DynProvider>, RegistryError> {
        self.providers
            .remove(kind)
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: kind.to_owned(),
            })
    }

    /// Looks up the provider for `kind`.
    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn DynProvider>, RegistryError> {
        self.providers
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: kind.to_owned(),
            })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::error::ProviderError;
    use crate::model::{Input, ServiceDefinition};
    use crate::provider::{InstanceId, Provider, RecordStream};

    struct NullProvider(&'static str);

    impl Provider for NullProvider {
        type Handle = ();

        fn kind(&self) -> &str {
            self.0
        }

        async fn provision(
            &self,
            _id: &InstanceId,
            _definition: &ServiceDefinition,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn inject(&self, _handle: &(), _input: &Input) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn capture(&self, _handle: &(), _since: Instant) -> Result<RecordStream, ProviderError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn teardown(&self, _handle: ()) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = ProviderRegistry::new();
        registry.register("null", NullProvider("null")).unwrap();

        let provider = registry.resolve("null").unwrap();
        assert_eq!(provider.kind(), "null");
        assert!(registry.contains("null"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn duplicate_kind_is_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register("null", NullProvider("null")).unwrap();
        let err = registry.register("null", NullProvider("other")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                kind: "null".to_owned()
            }
        );
        // the first registration is untouched
        assert_eq!(registry.resolve("null").unwrap().kind(), "null");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("docker").err().unwrap();
        assert!(err.to_string().contains("docker"));
    }

    #[test]
    fn kinds_are_sorted() {
        let mut registry = ProviderRegistry::new();
        registry.register("process", NullProvider("process")).unwrap();
        registry.register("docker", NullProvider("docker")).unwrap();
        registry.register("http", NullProvider("http")).unwrap();
        assert_eq!(registry.kinds(), vec!["docker", "http", "process"]);
    }

    #[test]
    fn shared_provider_under_two_kinds() {
        let mut registry = ProviderRegistry::new();
        let shared: Arc<dyn DynProvider> = Arc::new(NullProvider("container"));
        registry.register_shared("docker", Arc::clone(&shared)).unwrap();
        registry.register_shared("container", shared).unwrap();
        assert_eq!(registry.count(), 2);

        let removed = registry.unregister("docker").unwrap();
        assert_eq!(removed.kind(), "container");
        assert!(!registry.contains("docker"));
        assert!(registry.unregister("docker").is_err());
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProviderRegistry>();
    }
}
