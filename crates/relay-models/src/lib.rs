//! Provider client implementations for Relay.
//!
//! This crate provides concrete implementations of the `ProviderClient` trait.
//!
//! # Supported Providers
//!
//! - **OpenRouter**: cloud aggregator, also serves the live model listing
//! - **OpenAI**: direct vendor access (API key required)
//! - **Anthropic**: direct vendor access (API key required)
//! - **Mock**: scripted replies for testing and dry runs

pub mod claude;
pub mod factory;
mod http;
pub mod mock;
pub mod openai;
pub mod openrouter;

pub use claude::ClaudeClient;
pub use factory::{ProviderConfig, ProviderFactory};
pub use mock::{MockProvider, MockReply};
pub use openai::OpenAIClient;
pub use openrouter::OpenRouterClient;
