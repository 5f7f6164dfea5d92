//! Shared HTTP plumbing for the vendor clients.
//!
//! Every client funnels its request through [`send_json`] so that status codes
//! and transport failures are classified the same way for all providers.

use relay_abstraction::{ProviderError, ProviderKind};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

/// Maps a non-success HTTP status to a provider error.
pub(crate) fn classify_status(
    provider: ProviderKind,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderError {
    let message = format!("{provider} returned {status}: {}", truncate(body, 512));
    match status.as_u16() {
        401 | 403 => ProviderError::AuthError(message),
        // 402 is how aggregators report exhausted credit; it is a quota stop, not a bad request.
        402 | 429 => ProviderError::RateLimited { retry_after_secs, message },
        408 | 504 => ProviderError::Timeout(message),
        500..=599 => ProviderError::TransportError(message),
        _ => ProviderError::InvalidResponse(message),
    }
}

/// Maps a reqwest send/read failure to a provider error.
pub(crate) fn map_transport_error(
    provider: ProviderKind,
    err: &reqwest::Error,
    timeout: Duration,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("{provider} did not answer within {}s", timeout.as_secs_f64()))
    } else {
        ProviderError::TransportError(format!("{provider} request failed: {err}"))
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

/// Sends a prepared request and decodes the JSON body.
///
/// # Errors
/// Returns a classified `ProviderError` for transport failures, non-success
/// status codes, and undecodable bodies.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: ProviderKind,
    builder: RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let response = builder.timeout(timeout).send().await.map_err(|e| {
        error!(provider = %provider, error = %e, "Failed to send provider request");
        map_transport_error(provider, &e, timeout)
    })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        error!(provider = %provider, status = %status, "Provider returned error status");
        return Err(classify_status(provider, status, retry_after, &body));
    }

    let body = response.text().await.map_err(|e| map_transport_error(provider, &e, timeout))?;
    debug!(provider = %provider, bytes = body.len(), "Provider response received");
    serde_json::from_str(&body).map_err(|e| {
        error!(provider = %provider, error = %e, "Failed to parse provider response");
        ProviderError::InvalidResponse(format!("{provider} response could not be decoded: {e}"))
    })
}

/// Count tokens in a string (simplified: word count).
///
/// Used only when a provider omits usage information.
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}…")
    }
}
