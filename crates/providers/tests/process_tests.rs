//! `process` provider against real child processes.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

use systest_core::error::ProviderError;
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{DynProvider, InstanceId};
use systest_providers::ProcessProvider;

fn definition(config: Value, output_contains: Option<&str>) -> ServiceDefinition {
    ServiceDefinition {
        name: "proc".to_owned(),
        kind: "process".to_owned(),
        config,
        readiness: ReadinessProbe {
            timeout: Duration::from_secs(5),
            output_contains: output_contains.map(str::to_owned),
        },
    }
}

fn instance() -> InstanceId {
    InstanceId {
        service: "proc".to_owned(),
        instance: "proc-1".to_owned(),
    }
}

fn input(payload: Value) -> Input {
    Input {
        service: "proc".to_owned(),
        channel: None,
        payload,
        delay: Duration::ZERO,
        origin: None,
    }
}

fn provider() -> Arc<dyn DynProvider> {
    Arc::new(ProcessProvider::new())
}

#[tokio::test]
async fn cat_echoes_stdin_to_stdout() {
    // Given
    let provider = provider();
    let def = definition(json!({"command": "cat"}), None);
    let handle = provider.provision(&instance(), &def).await.unwrap();
    provider.await_ready(&handle, &def.readiness).await.unwrap();

    // When
    let mut stream = provider.capture(&handle, Instant::now()).await.unwrap();
    provider.inject(&handle, &input(json!("hello"))).await.unwrap();
    provider.inject(&handle, &input(json!({"id": 7}))).await.unwrap();

    // Then: lines come back in order, JSON lines parsed
    let first = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.channel, "out");
    assert_eq!(first.payload, json!("hello"));
    let second = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.payload, json!({"id": 7}));

    provider.teardown(handle).await.unwrap();
}

#[tokio::test]
async fn stderr_arrives_on_err_channel() {
    let provider = provider();
    let def = definition(
        json!({"command": "sh", "args": ["-c", "echo oops >&2; cat"]}),
        Some("oops"),
    );
    let since = Instant::now();
    let handle = provider.provision(&instance(), &def).await.unwrap();
    provider.await_ready(&handle, &def.readiness).await.unwrap();

    let mut stream = provider.capture(&handle, since).await.unwrap();
    let record = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.channel, "err");
    assert_eq!(record.payload, json!("oops"));

    provider.teardown(handle).await.unwrap();
}

#[tokio::test]
async fn env_and_instance_name_are_passed() {
    let provider = provider();
    let def = definition(
        json!({
            "command": "sh",
            "args": ["-c", "echo \"$GREETING $SYSTEST_INSTANCE\"; cat"],
            "env": {"GREETING": "hi"}
        }),
        Some("hi proc-1"),
    );
    let handle = provider.provision(&instance(), &def).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), provider.await_ready(&handle, &def.readiness))
        .await
        .unwrap()
        .unwrap();
    provider.teardown(handle).await.unwrap();
}

#[tokio::test]
async fn early_exit_fails_readiness() {
    let provider = provider();
    let def = definition(
        json!({"command": "sh", "args": ["-c", "echo boom; exit 3"]}),
        Some("listening"),
    );
    let handle = provider.provision(&instance(), &def).await.unwrap();

    let err = provider.await_ready(&handle, &def.readiness).await.unwrap_err();

    assert!(matches!(err, ProviderError::Provisioning { .. }));
    assert!(err.to_string().contains("exited"), "{err}");
    provider.teardown(handle).await.unwrap();
}

#[tokio::test]
async fn missing_binary_fails_provisioning() {
    let provider = provider();
    let def = definition(json!({"command": "/nonexistent/systest-binary"}), None);

    let err = provider.provision(&instance(), &def).await.unwrap_err();

    assert!(matches!(err, ProviderError::Provisioning { .. }));
}

#[tokio::test]
async fn teardown_kills_a_process_ignoring_stdin() {
    // Given: a process that does not stop when stdin closes
    let provider = provider();
    let def = definition(
        json!({"command": "sleep", "args": ["30"], "stop_timeout_ms": 100}),
        None,
    );
    let handle = provider.provision(&instance(), &def).await.unwrap();

    // When / Then: teardown returns well before the sleep would end
    tokio::time::timeout(Duration::from_secs(5), provider.teardown(handle))
        .await
        .unwrap()
        .unwrap();
}
