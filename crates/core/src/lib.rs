//! # systest-core
//!
//! Shared building blocks for systest, a declarative system-test
//! orchestrator:
//!
//! - [`model`]: immutable test-suite types produced by the parser
//! - [`provider`]: the SPI a service kind implements ([`Provider`], [`DynProvider`])
//! - [`registry`]: kind tag → provider lookup
//! - [`error`]: error taxonomy
//! - [`config`]: `systest.toml` loading
//! - [`metrics`]: metric names

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod registry;

// --- re-exports ---

// errors
pub use error::{
    ConfigError, Location, ParseError, ParseErrorKind, ProviderError, RegistryError, SystestError,
};

// config
pub use config::SystestConfig;

// model
pub use model::{
    DEFAULT_CHANNEL, Disabled, Expectation, ExpectationKind, Input, Matcher, OrderingMode,
    Pattern, ReadinessProbe, ServiceDefinition, ServiceRef, SuiteDefaults, TestCase, TestSuite,
};

// provider SPI
pub use provider::{
    BoxFuture, DynProvider, ErasedHandle, InstanceId, Observation, Provider, RecordStream,
};
pub use registry::ProviderRegistry;
