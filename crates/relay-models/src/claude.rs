//! Anthropic (Claude) provider client.
//!
//! Claude takes system instructions through a dedicated `system` field rather
//! than inline messages. System messages are pulled out of the conversation and
//! concatenated with a blank line between them.

use crate::http::{estimate_tokens, send_json};
use async_trait::async_trait;
use relay_abstraction::{
    ChatMessage, ChatRole, ProviderClient, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude provider client.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl ClaudeClient {
    /// Creates a client using `ANTHROPIC_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns `ProviderError::AuthError` if the variable is not set.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ProviderError::AuthError("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a client with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Overrides the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn extract_system_prompt(messages: &[ChatMessage]) -> Option<String> {
        let parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() { None } else { Some(parts.join("\n\n")) }
    }

    fn build_request(model_id: &str, request: &ProviderRequest) -> ClaudeRequest {
        ClaudeRequest {
            model: model_id.to_string(),
            system: Self::extract_system_prompt(&request.messages),
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| ClaudeMessage {
                    role: if m.role == ChatRole::Assistant { "assistant" } else { "user" }
                        .to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ProviderClient for ClaudeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
            "ClaudeClient generating chat completion"
        );

        let url = format!("{}/messages", self.base_url);
        let builder = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_request(model_id, request));

        let response: ClaudeResponse =
            send_json(ProviderKind::Anthropic, builder, timeout).await?;

        // Text blocks are concatenated; tool-use blocks are ignored.
        let content: String = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let completion_tokens =
            response.usage.as_ref().map_or_else(|| estimate_tokens(&content), |u| u.output_tokens);

        Ok(ProviderResponse {
            content,
            completion_tokens,
            raw_metadata: json!({
                "id": response.id,
                "model": response.model,
                "stop_reason": response.stop_reason,
                "usage": response.usage.as_ref().map(|u| json!({
                    "input_tokens": u.input_tokens,
                    "output_tokens": u.output_tokens,
                })),
            }),
        })
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ClaudeContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
