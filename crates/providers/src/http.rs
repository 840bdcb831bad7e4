//! `http` provider: an endpoint that is already running.
//!
//! ```yaml
//! services:
//!   api:
//!     kind: http
//!     config:
//!       base_url: http://localhost:8080
//!       health_path: /health
//! ```
//!
//! Each input is one request. Its payload is either a path string or an
//! object `{method, path, headers, body}`. Every response becomes one
//! record `{"status": 201, "body": ...}` on channel `out`; the body is JSON
//! when it parses, a string otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;

use systest_core::error::ProviderError;
use systest_core::model::{Input, ReadinessProbe, ServiceDefinition};
use systest_core::provider::{InstanceId, Observation, Provider, RecordStream};

use crate::error::ProviderConfigError;
use crate::output::OutputBuffer;
use crate::spec;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `config` block of an `http` service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSpec {
    pub base_url: String,
    #[serde(default)]
    pub health_path: Option<String>,
}

/// One request, as described by an input payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_owned()
}

fn default_path() -> String {
    "/".to_owned()
}

impl HttpRequest {
    /// Reads a request from an input payload.
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        match payload {
            Value::String(path) => Ok(Self {
                method: default_method(),
                path: path.clone(),
                headers: BTreeMap::new(),
                body: None,
            }),
            Value::Object(_) => {
                serde_json::from_value(payload.clone()).map_err(|e| format!("bad request: {e}"))
            }
            other => Err(format!("request must be a path or an object, got {other}")),
        }
    }
}

/// Talks to endpoints over HTTP with a shared client.
#[derive(Debug, Clone, Default)]
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub struct HttpHandle {
    service: String,
    base_url: Url,
    health_path: Option<String>,
    responses: Arc<OutputBuffer>,
}

impl HttpHandle {
    fn url(&self, path: &str) -> Result<Url, String> {
        self.base_url
            .join(path)
            .map_err(|e| format!("bad path '{path}': {e}"))
    }
}

impl Provider for HttpProvider {
    type Handle = HttpHandle;

    fn kind(&self) -> &str {
        "http"
    }

    async fn provision(
        &self,
        id: &InstanceId,
        definition: &ServiceDefinition,
    ) -> Result<HttpHandle, ProviderError> {
        let spec: HttpSpec = spec::parse(&id.service, &definition.config)?;
        let base_url = Url::parse(&spec.base_url).map_err(|e| ProviderConfigError::Invalid {
            service: id.service.clone(),
            reason: format!("base_url: {e}"),
        })?;
        tracing::debug!(service = %id.service, base_url = %base_url, "http endpoint registered");
        Ok(HttpHandle {
            service: id.service.clone(),
            base_url,
            health_path: spec.health_path,
            responses: Arc::new(OutputBuffer::new()),
        })
    }

    /// Polls `health_path` until it answers 2xx. The executor bounds the wait.
    async fn await_ready(
        &self,
        handle: &HttpHandle,
        _probe: &ReadinessProbe,
    ) -> Result<(), ProviderError> {
        let Some(path) = &handle.health_path else {
            return Ok(());
        };
        let url = handle.url(path).map_err(|reason| ProviderError::Provisioning {
            service: handle.service.clone(),
            reason,
        })?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(service = %handle.service, attempts = attempt, "endpoint healthy");
                    return Ok(());
                }
                Ok(response) => {
                    tracing::trace!(service = %handle.service, status = %response.status(), "endpoint not healthy yet");
                }
                Err(e) => {
                    tracing::trace!(service = %handle.service, error = %e, "endpoint not reachable yet");
                }
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    async fn inject(&self, handle: &HttpHandle, input: &Input) -> Result<(), ProviderError> {
        let dispatch = |reason: String| ProviderError::Dispatch {
            service: handle.service.clone(),
            reason,
        };
        let request = HttpRequest::from_payload(&input.payload).map_err(dispatch)?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| dispatch(format!("bad method '{}': {e}", request.method)))?;
        let url = handle.url(&request.path).map_err(dispatch)?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| dispatch(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| dispatch(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::trace!(service = %handle.service, status = status, path = %request.path, "response received");
        handle
            .responses
            .push(Observation::new("out", json!({"status": status, "body": body})));
        Ok(())
    }

    async fn capture(
        &self,
        handle: &HttpHandle,
        since: Instant,
    ) -> Result<RecordStream, ProviderError> {
        Ok(handle.responses.subscribe_from(since))
    }

    async fn teardown(&self, handle: HttpHandle) -> Result<(), ProviderError> {
        handle.responses.close();
        Ok(())
    }
}
