//! Suite and executor builders.

use std::sync::Arc;

use systest_core::model::TestSuite;
use systest_core::registry::ProviderRegistry;
use systest_executor::{ExecutorOptions, SuiteExecutor};
use systest_parser::SuiteParser;

use super::mock_provider::{MockProvider, Stats};

/// Parses a suite document, panicking with the parse error.
pub fn parse(yaml: &str) -> TestSuite {
    SuiteParser::new()
        .parse("e2e.yaml", yaml)
        .unwrap_or_else(|e| panic!("suite should parse: {e}"))
}

/// An executor with one `mock` provider. Returns its counters.
#[allow(dead_code)]
pub fn mock_executor(options: ExecutorOptions) -> (SuiteExecutor, Stats) {
    let provider = MockProvider::new("mock");
    let stats = provider.stats.clone();
    let mut registry = ProviderRegistry::new();
    registry.register("mock", provider).unwrap();
    (SuiteExecutor::new(Arc::new(registry), options), stats)
}

/// An executor with one provider per kind, each with its own counters.
#[allow(dead_code)]
pub fn executor_with_kinds(kinds: &[&str], options: ExecutorOptions) -> (SuiteExecutor, Vec<Stats>) {
    let mut registry = ProviderRegistry::new();
    let mut stats = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let provider = MockProvider::new(kind);
        stats.push(provider.stats.clone());
        registry.register(*kind, provider).unwrap();
    }
    (SuiteExecutor::new(Arc::new(registry), options), stats)
}

/// A single echo service with one case sending `hello` and expecting it back.
#[allow(dead_code)]
pub const ECHO_SUITE: &str = r#"
name: echo
services:
  echo:
    kind: mock
    config:
      echo_delay_ms: 50
tests:
  - name: says-hello
    inputs:
      - service: echo
        payload: hello
    expectations:
      - service: echo
        equals: hello
        timeout_ms: 1000
"#;
