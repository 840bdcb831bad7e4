//! Serialized document shapes.
//!
//! These mirror the YAML one to one and carry no invariants; the parser
//! validates them and converts them into `systest_core::model` types.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use systest_core::model::OrderingMode;

/// A suite file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteDocument {
    /// Schema version, e.g. `"1.0"`. Absent means the current version.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: Option<DisabledDocument>,
    #[serde(default)]
    pub defaults: DefaultsDocument,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDocument>,
    #[serde(default)]
    pub tests: Vec<TestCaseDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisabledDocument {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsDocument {
    #[serde(default)]
    pub expectation_timeout_ms: Option<u64>,
    #[serde(default)]
    pub readiness_timeout_ms: Option<u64>,
    #[serde(default)]
    pub ordering: Option<OrderingMode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDocument {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub readiness: Option<ReadinessDocument>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessDocument {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub output_contains: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCaseDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub disabled: Option<DisabledDocument>,
    /// Services the case uses. Empty means every suite service.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<InputDocument>,
    #[serde(default)]
    pub expectations: Vec<ExpectationDocument>,
}

/// An inline input, a `ref` to `inputs/<id>.yaml`, or the content of such a file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDocument {
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// An inline expectation, a `ref` to `expectations/<id>.yaml`, or the content of such a file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationDocument {
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub equals: Option<Value>,
    #[serde(default)]
    pub contains: Option<Value>,
    #[serde(default)]
    pub matches: Option<String>,
    #[serde(default)]
    pub no_extra_output: bool,
    #[serde(default)]
    pub ordering: Option<OrderingMode>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}
