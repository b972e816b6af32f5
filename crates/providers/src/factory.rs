//! Provider construction from configuration.
//!
//! A request that brings its own API key gets a provider built for that
//! key; otherwise the key from the config file (or environment) is used.

use matagent_config::AppConfig;
use matagent_core::error::ProviderError;
use matagent_core::provider::{Provider, ProviderFactory};
use std::sync::Arc;

use crate::openai_compat::OpenAiCompatProvider;

/// Builds [`OpenAiCompatProvider`]s against one configured endpoint.
#[derive(Clone)]
pub struct ConfiguredProviderFactory {
    name: String,
    base_url: String,
    default_key: Option<String>,
}

impl ConfiguredProviderFactory {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, default_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            default_key,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let name = if config.base_url.contains("api.openai.com") {
            "openai"
        } else {
            "custom"
        };
        Self::new(name, &config.base_url, config.api_key.clone())
    }
}

impl std::fmt::Debug for ConfiguredProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredProviderFactory")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("default_key", &self.default_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProviderFactory for ConfiguredProviderFactory {
    fn build(&self, api_key: Option<&str>) -> Result<Arc<dyn Provider>, ProviderError> {
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| self.default_key.clone())
            .ok_or_else(|| {
                ProviderError::NotConfigured(
                    "no API key: set api_key in config.toml, MATAGENT_API_KEY, or pass apiKey".into(),
                )
            })?;
        Ok(Arc::new(OpenAiCompatProvider::new(&self.name, &self.base_url, key)))
    }
}
