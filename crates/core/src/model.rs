//! Test-definition model.
//!
//! Everything here is produced by the parser and read-only afterwards. The
//! executor borrows a [`TestSuite`] for the whole run and never mutates it.
//!
//! ```text
//! TestSuite ─┬─ ServiceDefinition*     (topology, shared by all cases)
//!            └─ TestCase* ─┬─ ServiceRef*   → ServiceDefinition
//!                          ├─ Input*        (seed first, then declared)
//!                          └─ Expectation*
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::error::Location;

/// Channel an expectation watches when none is given.
pub const DEFAULT_CHANNEL: &str = "out";

/// A parsed and validated test suite.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub description: Option<String>,
    pub disabled: Option<Disabled>,
    pub defaults: SuiteDefaults,
    /// Declared services, ordered by name.
    pub services: Vec<Arc<ServiceDefinition>>,
    /// Test cases in declaration order. Names are unique.
    pub cases: Vec<TestCase>,
    pub location: Location,
}

impl TestSuite {
    /// Looks up a declared service by name.
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceDefinition>> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Looks up a test case by name.
    pub fn case(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }
}

/// Why a suite or case is not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disabled {
    pub reason: String,
    /// Optional link to a tracking issue.
    pub issue: Option<String>,
}

impl fmt::Display for Disabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issue {
            Some(issue) => write!(f, "{} ({issue})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Suite-wide values applied where a document leaves them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteDefaults {
    pub expectation_timeout: Duration,
    pub readiness_timeout: Duration,
    pub ordering: OrderingMode,
}

/// Runtime descriptor for one logical service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    /// Provider kind tag, e.g. `docker` or `process`.
    pub kind: String,
    /// Provider-specific settings. Always a JSON object.
    pub config: Value,
    pub readiness: ReadinessProbe,
}

impl ServiceDefinition {
    /// Returns a string setting from `config`.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// How the executor decides a provisioned service is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub timeout: Duration,
    /// Ready once any output line contains this text.
    pub output_contains: Option<String>,
}

/// A case's use of a declared service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRef {
    pub name: String,
    pub definition: Arc<ServiceDefinition>,
}

/// One test case.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub notes: Option<String>,
    pub disabled: Option<Disabled>,
    pub services: Vec<ServiceRef>,
    /// Package seed data, dispatched before `inputs`.
    pub seed: Vec<Input>,
    pub inputs: Vec<Input>,
    pub expectations: Vec<Expectation>,
    pub location: Location,
}

impl TestCase {
    pub fn service(&self, name: &str) -> Option<&ServiceRef> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Seed inputs followed by declared inputs, in dispatch order.
    pub fn dispatch_order(&self) -> impl Iterator<Item = &Input> {
        self.seed.iter().chain(self.inputs.iter())
    }

    /// Longest expectation timeout in the case.
    pub fn max_expectation_timeout(&self) -> Duration {
        self.expectations
            .iter()
            .map(|e| e.timeout)
            .max()
            .unwrap_or_default()
    }

    /// Longest readiness timeout across the case's services.
    pub fn max_readiness_timeout(&self) -> Duration {
        self.services
            .iter()
            .map(|s| s.definition.readiness.timeout)
            .max()
            .unwrap_or_default()
    }
}

/// An action that sends a payload to a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub service: String,
    /// Provider-specific target inside the service. `None` means the default.
    pub channel: Option<String>,
    pub payload: Value,
    /// Offset from the case clock start.
    pub delay: Duration,
    /// Id of the reusable file this input came from.
    pub origin: Option<String>,
}

impl Input {
    /// Payload as a single line of text: strings verbatim, anything else as compact JSON.
    pub fn payload_text(&self) -> String {
        payload_text(&self.payload)
    }
}

/// Renders a JSON value the way it appears on a line-oriented channel.
pub fn payload_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expected output on one service channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub service: String,
    pub channel: String,
    pub kind: ExpectationKind,
    pub ordering: OrderingMode,
    /// Window measured from the case clock start.
    pub timeout: Duration,
    pub location: Location,
}

impl Expectation {
    pub fn target(&self) -> (&str, &str) {
        (&self.service, &self.channel)
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        match &self.kind {
            ExpectationKind::Record(m) => Some(m),
            ExpectationKind::NoExtraOutput => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpectationKind {
    /// A record satisfying the matcher must arrive within the window.
    Record(Matcher),
    /// No record left unclaimed by other expectations may arrive within the window.
    NoExtraOutput,
}

/// How a record payload is compared with the expected value.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Exact equality.
    Equals(Value),
    /// Structural subset: objects may carry extra keys.
    Contains(Value),
    /// Regex over the record's text form.
    Matches(Pattern),
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => write!(f, "equals {v}"),
            Self::Contains(v) => write!(f, "contains {v}"),
            Self::Matches(p) => write!(f, "matches /{}/", p.as_str()),
        }
    }
}

/// Compiled regex compared by its source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(regex: Regex) -> Self {
        Self(regex)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Whether same-target expectations must match in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    Ordered,
    #[default]
    Unordered,
}

impl fmt::Display for OrderingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordered => write!(f, "ordered"),
            Self::Unordered => write!(f, "unordered"),
        }
    }
}
