//! Typed views of a service's `config` block.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProviderConfigError;

/// Deserializes `config` into a provider's spec type.
pub(crate) fn parse<T: DeserializeOwned>(
    service: &str,
    config: &Value,
) -> Result<T, ProviderConfigError> {
    serde_json::from_value(config.clone()).map_err(|e| ProviderConfigError::Invalid {
        service: service.to_owned(),
        reason: e.to_string(),
    })
}
