//! Provider factory for creating clients from configuration.
//!
//! Handles API key resolution: an explicit key wins, then the configured
//! environment variable, then the provider's conventional variable.

use crate::{ClaudeClient, MockProvider, OpenAIClient, OpenRouterClient};
use relay_abstraction::{ModelListing, ProviderClient, ProviderError, ProviderKind};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::{debug, error};

/// Configuration for one provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which backend to create.
    pub kind: ProviderKind,
    /// Environment variable holding the API key; defaults per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Inline API key. Prefer `api_key_env` in checked-in files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (proxies, self-hosted gateways, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Creates a configuration that reads the key from the default variable.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind, api_key_env: None, api_key: None, base_url: None }
    }

    /// Sets an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The environment variable consulted when no inline key is given.
    #[must_use]
    pub fn key_variable(&self) -> Option<&str> {
        if let Some(name) = self.api_key_env.as_deref() {
            return Some(name);
        }
        match self.kind {
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Mock => None,
        }
    }

    fn resolve_key(&self) -> Result<String, ProviderError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        let var = self.key_variable().unwrap_or_default();
        env::var(var).ok().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            error!(provider = %self.kind, variable = %var, "API key not configured");
            ProviderError::AuthError(format!("{var} environment variable not set"))
        })
    }
}

/// Factory for creating provider clients.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Creates a provider client from the given configuration.
    ///
    /// # Errors
    /// Returns `ProviderError::AuthError` when the provider needs a key and
    /// none can be found.
    pub fn create(config: &ProviderConfig) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        debug!(provider = %config.kind, "Creating provider client");

        match config.kind {
            ProviderKind::Mock => Ok(Arc::new(MockProvider::default())),
            ProviderKind::OpenRouter => Ok(Arc::new(Self::openrouter(config)?)),
            ProviderKind::OpenAi => {
                let mut client = OpenAIClient::with_api_key(config.resolve_key()?);
                if let Some(url) = &config.base_url {
                    client = client.with_base_url(url.clone());
                }
                Ok(Arc::new(client))
            }
            ProviderKind::Anthropic => {
                let mut client = ClaudeClient::with_api_key(config.resolve_key()?);
                if let Some(url) = &config.base_url {
                    client = client.with_base_url(url.clone());
                }
                Ok(Arc::new(client))
            }
        }
    }

    /// Creates the model-listing endpoint for providers that expose one.
    ///
    /// Only OpenRouter publishes a usable live listing; other kinds return `Ok(None)`.
    ///
    /// # Errors
    /// Returns `ProviderError::AuthError` when the key is missing.
    pub fn create_listing(
        config: &ProviderConfig,
    ) -> Result<Option<Arc<dyn ModelListing>>, ProviderError> {
        match config.kind {
            ProviderKind::OpenRouter => Ok(Some(Arc::new(Self::openrouter(config)?))),
            _ => Ok(None),
        }
    }

    fn openrouter(config: &ProviderConfig) -> Result<OpenRouterClient, ProviderError> {
        let mut client = OpenRouterClient::with_api_key(config.resolve_key()?);
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url.clone());
        }
        Ok(client)
    }
}
