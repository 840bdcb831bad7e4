//! Error types, one enum per domain.
//!
//! [`SystestError`] is the umbrella type returned across crate boundaries.
//! Case-scoped failures (provisioning, dispatch, crashes) are carried as
//! [`ProviderError`] and never escape a single test case.

use std::fmt;

use serde::Serialize;

/// Top-level systest error.
#[derive(Debug, thiserror::Error)]
pub enum SystestError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Test definition could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Provider registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Provider operation failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file is not valid TOML
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A value is out of range or not one of the allowed values
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

// ─── ParseError ──────────────────────────────────────────────────────

/// Position of a problem inside a test-definition document.
///
/// `path` uses the document's own structure, e.g. `tests[1].expectations[0].service`.
/// `line` and `column` are 1-based and only known for syntax errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    pub source: String,
    pub path: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Location {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Returns a copy of this location pointing at `path`.
    pub fn at(&self, path: impl Into<String>) -> Self {
        Self {
            source: self.source.clone(),
            path: path.into(),
            line: None,
            column: None,
        }
    }

    pub fn with_position(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, ":{line}:{column}")?;
        }
        if !self.path.is_empty() {
            write!(f, " at {}", self.path)?;
        }
        Ok(())
    }
}

/// Test-definition document error. Fatal to suite start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{location}: {kind}")]
pub struct ParseError {
    pub location: Location,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(location: Location, kind: ParseErrorKind) -> Self {
        Self { location, kind }
    }
}

/// What went wrong while parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    /// Not a well-formed document, or a field of the wrong type
    #[error("invalid document: {0}")]
    Syntax(String),

    /// A required field is absent or empty
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// A field has an unacceptable value
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Two entries share a name that must be unique
    #[error("duplicate {what} '{name}'")]
    Duplicate { what: String, name: String },

    /// A name refers to something that was never declared
    #[error("unknown {what} '{name}'")]
    UnknownReference { what: String, name: String },

    /// A `ref` names a reusable file that does not exist in the package
    #[error("missing {what} dependency '{id}'")]
    MissingDependency { what: String, id: String },

    /// No provider is registered for a service kind
    #[error("no provider registered for kind '{kind}'")]
    UnknownKind { kind: String },

    /// The document's schema version is not supported
    #[error("unsupported schema version '{version}': {reason}")]
    UnsupportedSchema { version: String, reason: String },

    /// The document exceeds the size limit
    #[error("document too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    /// The document could not be read
    #[error("failed to read document: {0}")]
    Read(String),
}

// ─── Registry / Provider ─────────────────────────────────────────────

/// Provider registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A provider is already registered for this kind
    #[error("provider already registered for kind '{kind}'")]
    AlreadyRegistered { kind: String },

    /// No provider is registered for this kind
    #[error("unknown provider kind '{kind}'")]
    UnknownKind { kind: String },
}

/// Errors raised by provider operations.
///
/// Every variant is scoped to a single test case.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The service could not be started
    #[error("provisioning '{service}' failed: {reason}")]
    Provisioning { service: String, reason: String },

    /// The readiness probe did not succeed in time
    #[error("service '{service}' not ready after {timeout_ms} ms")]
    NotReady { service: String, timeout_ms: u64 },

    /// An input could not be delivered
    #[error("dispatch to '{service}' failed: {reason}")]
    Dispatch { service: String, reason: String },

    /// Output capture could not be started
    #[error("capture from '{service}' failed: {reason}")]
    Capture { service: String, reason: String },

    /// Releasing the service failed
    #[error("teardown of '{service}' failed: {reason}")]
    Teardown { service: String, reason: String },

    /// The operation was cancelled before it completed
    #[error("operation on '{service}' cancelled")]
    Cancelled { service: String },

    /// The service definition is not usable by this provider
    #[error("invalid configuration for '{service}': {reason}")]
    InvalidConfig { service: String, reason: String },

    /// A handle was passed to a provider that did not create it
    #[error("handle for '{service}' was not created by provider '{kind}'")]
    HandleMismatch { service: String, kind: String },

    /// The provider panicked
    #[error("provider '{kind}' crashed: {reason}")]
    Crashed { kind: String, reason: String },
}

impl ProviderError {
    /// Name of the service the error refers to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::Provisioning { service, .. }
            | Self::NotReady { service, .. }
            | Self::Dispatch { service, .. }
            | Self::Capture { service, .. }
            | Self::Teardown { service, .. }
            | Self::Cancelled { service }
            | Self::InvalidConfig { service, .. }
            | Self::HandleMismatch { service, .. } => Some(service),
            Self::Crashed { .. } => None,
        }
    }
}
