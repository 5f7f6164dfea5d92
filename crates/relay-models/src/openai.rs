//! OpenAI provider client.
//!
//! Talks to the `/chat/completions` endpoint. The wire types here are shared
//! with the OpenRouter client, whose API is OpenAI-compatible.

use crate::http::{estimate_tokens, send_json};
use async_trait::async_trait;
use relay_abstraction::{
    ChatMessage, ProviderClient, ProviderError, ProviderKind, ProviderRequest, ProviderResponse,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the OpenAI API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAIClient {
    /// Creates a client using `OPENAI_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns `ProviderError::AuthError` if the variable is not set.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::AuthError("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a client with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), base_url: OPENAI_BASE_URL.to_string(), client: Client::new() }
    }

    /// Overrides the base URL (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAIClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
            "OpenAIClient generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionRequest::from_request(model_id, request));

        let response: ChatCompletionResponse =
            send_json(ProviderKind::OpenAi, builder, timeout).await?;
        response.into_provider_response(ProviderKind::OpenAi)
    }
}

// OpenAI-compatible request/response structures

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionRequest {
    pub(crate) fn from_request(model_id: &str, request: &ProviderRequest) -> Self {
        Self {
            model: model_id.to_string(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    role: String,
    // Reasoning models may answer with a null content and only a reasoning field.
    #[serde(default)]
    content: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self { role: msg.role.as_str().to_string(), content: Some(msg.content.clone()) }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl ChatCompletionResponse {
    /// Normalizes the vendor payload.
    ///
    /// A response without choices is invalid; a choice with null content is
    /// passed through as empty so the failover layer can treat it as a soft
    /// failure.
    pub(crate) fn into_provider_response(
        self,
        provider: ProviderKind,
    ) -> Result<ProviderResponse, ProviderError> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse(format!("{provider} response contained no choices"))
        })?;
        let content = choice.message.content.unwrap_or_default();
        let completion_tokens = self
            .usage
            .as_ref()
            .map_or_else(|| estimate_tokens(&content), |u| u.completion_tokens);

        let raw_metadata = json!({
            "id": self.id,
            "model": self.model,
            "finish_reason": choice.finish_reason,
            "usage": self.usage.as_ref().map(|u| json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })),
        });

        Ok(ProviderResponse { content, completion_tokens, raw_metadata })
    }
}
