//! Provider abstraction layer for Relay.
//!
//! This crate defines the boundary between the orchestration core and the
//! concrete model vendors. Every vendor response is normalized into a
//! [`ProviderResponse`] and every vendor failure into a [`ProviderError`]
//! before it reaches the routing and failover logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// The set of provider backends Relay knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Cloud aggregator routing to many upstream vendors (OpenRouter).
    OpenRouter,
    /// Direct OpenAI API access.
    OpenAi,
    /// Direct Anthropic API access.
    Anthropic,
    /// Scripted in-process provider for tests and dry runs.
    Mock,
}

impl ProviderKind {
    /// Returns the stable identifier used in model specs (`provider:model`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" | "aggregator" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown provider kind '{other}'")),
        }
    }
}

/// Represents a failure returned by a provider invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    /// Credentials were missing, invalid, or rejected by the provider.
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// The provider refused the request because of rate limits or exhausted quota.
    #[error("rate limited{}: {message}", retry_suffix(.retry_after_secs))]
    RateLimited {
        /// Seconds the provider asked us to wait, if it said so.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
        /// Provider supplied message.
        message: String,
    },

    /// The request did not complete within its time budget.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Network or server-side failure before a usable response arrived.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The provider answered, but the payload could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default()
}

impl ProviderError {
    /// Short class name used in logs and aggregated failure messages.
    #[must_use]
    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::AuthError(_) => "AuthError",
            Self::RateLimited { .. } => "RateLimited",
            Self::Timeout(_) => "Timeout",
            Self::TransportError(_) => "TransportError",
            Self::InvalidResponse(_) => "InvalidResponse",
        }
    }
}

/// Role of a message in the normalized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model.
    System,
    /// Content written by the caller.
    User,
    /// Content previously produced by a model.
    Assistant,
}

impl ChatRole {
    /// Returns the wire name shared by OpenAI-compatible APIs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a normalized chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender.
    pub role: ChatRole,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with the given role.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    /// Shorthand for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Shorthand for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// The normalized request every provider client accepts.
///
/// Vendor-specific request bodies are built inside each client from this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Conversation to send, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature, between 0 and 2.
    pub temperature: f32,
}

impl ProviderRequest {
    /// Creates a request with default generation parameters.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Self::default() }
    }

    /// Sets the maximum number of generated tokens.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Rough prompt size in tokens (four characters per token).
    #[must_use]
    pub fn estimated_prompt_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        (chars / 4) as u32
    }
}

impl Default for ProviderRequest {
    fn default() -> Self {
        Self { messages: Vec::new(), max_tokens: 2048, temperature: 0.7 }
    }
}

/// The normalized result of one successful provider invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text.
    pub content: String,
    /// Number of completion tokens reported (or estimated) for the response.
    pub completion_tokens: u32,
    /// Vendor metadata passed through untouched (ids, finish reasons, usage).
    #[serde(default)]
    pub raw_metadata: serde_json::Value,
}

impl ProviderResponse {
    /// Returns true when the response carries no usable content.
    ///
    /// Whitespace-only content and a zero completion-token count both count
    /// as empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() || self.completion_tokens == 0
    }
}

/// Entry returned by a provider's model-listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedModel {
    /// Provider-side model identifier.
    pub id: String,
    /// Maximum context window in tokens.
    pub context_length: u32,
    /// Prompt price in USD per one million tokens.
    pub prompt_price_per_million: f64,
    /// Whether the provider advertises tool / function calling.
    pub supports_tools: bool,
}

/// Executes model invocations against one backend.
///
/// All clients must be `Send + Sync` so they can be shared by concurrent task
/// workers.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which backend this client talks to.
    fn kind(&self) -> ProviderKind;

    /// Runs one model invocation.
    ///
    /// # Arguments
    /// * `model_id` - Provider-side model identifier
    /// * `request` - The normalized request
    /// * `timeout` - Time budget for this single invocation
    ///
    /// # Errors
    /// Returns a `ProviderError` classifying why no response was produced.
    async fn execute(
        &self,
        model_id: &str,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Lists the models a provider currently serves.
#[async_trait]
pub trait ModelListing: Send + Sync {
    /// Fetches the provider's live model list.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the listing endpoint cannot be read.
    async fn list_models(&self) -> Result<Vec<ListedModel>, ProviderError>;
}
