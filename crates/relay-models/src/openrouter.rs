//! OpenRouter aggregator client.
//!
//! OpenRouter fronts many upstream vendors behind an OpenAI-compatible chat
//! API. Besides completions it exposes `/models`, which the catalog uses for
//! live refreshes.

use crate::http::send_json;
use crate::openai::{ChatCompletionRequest, ChatCompletionResponse};
use async_trait::async_trait;
use relay_abstraction::{
    ListedModel, ModelListing, ProviderClient, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse,
};
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

/// Default OpenRouter API base URL.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const LISTING_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenRouter provider client.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenRouterClient {
    /// Creates a client using `OPENROUTER_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns `ProviderError::AuthError` if the variable is not set.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENROUTER_API_KEY").map_err(|_| {
            ProviderError::AuthError("OPENROUTER_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a client with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENROUTER_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Overrides the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ProviderClient for OpenRouterClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    async fn execute(
        &self,
        model_id: &str,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            model_id = %model_id,
            message_count = request.messages.len(),
            "OpenRouterClient generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "relay")
            .json(&ChatCompletionRequest::from_request(model_id, request));

        let response: ChatCompletionResponse =
            send_json(ProviderKind::OpenRouter, builder, timeout).await?;
        response.into_provider_response(ProviderKind::OpenRouter)
    }
}

#[async_trait]
impl ModelListing for OpenRouterClient {
    async fn list_models(&self) -> Result<Vec<ListedModel>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let builder = self.client.get(url).bearer_auth(&self.api_key);
        let listing: ModelsResponse =
            send_json(ProviderKind::OpenRouter, builder, LISTING_TIMEOUT).await?;

        let total = listing.data.len();
        let models: Vec<ListedModel> = listing.data.into_iter().filter_map(WireModel::into_listed).collect();
        if models.len() < total {
            warn!(skipped = total - models.len(), "Skipped OpenRouter models with unreadable pricing");
        }
        debug!(count = models.len(), "OpenRouter model listing fetched");
        Ok(models)
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(default)]
    context_length: Option<u32>,
    #[serde(default)]
    pricing: Option<WirePricing>,
    #[serde(default)]
    supported_parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WirePricing {
    // Prices are decimal strings in USD per token.
    #[serde(default)]
    prompt: Option<String>,
}

impl WireModel {
    fn into_listed(self) -> Option<ListedModel> {
        let per_token: f64 = match self.pricing.and_then(|p| p.prompt) {
            Some(raw) => raw.trim().parse().ok()?,
            None => 0.0,
        };
        // OpenRouter uses -1 for "variable" pricing on router meta-models.
        if per_token < 0.0 {
            return None;
        }
        Some(ListedModel {
            id: self.id,
            context_length: self.context_length.unwrap_or(0),
            prompt_price_per_million: per_token * 1_000_000.0,
            supports_tools: self.supported_parameters.iter().any(|p| p == "tools"),
        })
    }
}
