//! Sequential failover across ranked candidates.
//!
//! The executor walks a ranked candidate list, giving each model one attempt
//! under a per-attempt timeout. Hard errors and empty responses both move on
//! to the next candidate; the first non-empty response wins. Every attempt is
//! counted in the [`UsageTracker`].

use relay_abstraction::{ProviderClient, ProviderError, ProviderKind, ProviderRequest, ProviderResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::routing::{ModelCatalog, ModelDescriptor, ModelId, UsageTracker};

/// Default number of candidates tried before giving up.
pub const DEFAULT_MAX_FALLBACKS: usize = 4;
/// Default time budget for a single attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Why one attempt did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Transport succeeded but the content was blank or had no tokens.
    EmptyResponse,
    /// The attempt ran out of time.
    Timeout,
    /// Credentials were rejected.
    AuthError,
    /// Rate limit or exhausted quota.
    RateLimited,
    /// Network or upstream server failure.
    TransportError,
    /// Unusable payload.
    InvalidResponse,
}

impl FailureKind {
    /// Name used in logs and aggregated messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyResponse => "EmptyResponse",
            Self::Timeout => "Timeout",
            Self::AuthError => "AuthError",
            Self::RateLimited => "RateLimited",
            Self::TransportError => "TransportError",
            Self::InvalidResponse => "InvalidResponse",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ProviderError> for FailureKind {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::AuthError(_) => Self::AuthError,
            ProviderError::RateLimited { .. } => Self::RateLimited,
            ProviderError::Timeout(_) => Self::Timeout,
            ProviderError::TransportError(_) => Self::TransportError,
            ProviderError::InvalidResponse(_) => Self::InvalidResponse,
        }
    }
}

/// Record of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Model that was tried.
    pub model_id: ModelId,
    /// Failure class.
    pub failure: FailureKind,
    /// Error text, if any.
    pub detail: String,
    /// Time spent on the attempt.
    #[serde(skip)]
    pub duration: Duration,
}

fn format_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.model_id, a.failure))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failover outcome when no candidate produced a result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailoverError {
    /// No usable candidate was supplied.
    #[error("no candidate models with a registered provider")]
    NoCandidates,

    /// Every attempted candidate failed.
    #[error("All fallbacks exhausted after {} attempts: {}", .attempts.len(), format_attempts(.attempts))]
    AllFallbacksExhausted {
        /// Failed attempts in order.
        attempts: Vec<AttemptRecord>,
    },

    /// The cancellation token fired.
    #[error("execution cancelled after {} attempts", .attempts.len())]
    Cancelled {
        /// Attempts completed before cancellation.
        attempts: Vec<AttemptRecord>,
    },
}

impl FailoverError {
    /// Attempts made before the error, in order.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::NoCandidates => &[],
            Self::AllFallbacksExhausted { attempts } | Self::Cancelled { attempts } => attempts,
        }
    }
}

/// Successful failover run.
#[derive(Debug, Clone)]
pub struct FailoverOutcome {
    /// The model that answered.
    pub model: ModelDescriptor,
    /// Its response.
    pub response: ProviderResponse,
    /// Failed attempts that preceded the winner.
    pub failed_attempts: Vec<AttemptRecord>,
    /// Duration of the winning attempt.
    pub duration: Duration,
}

impl FailoverOutcome {
    /// Total attempts, including the winning one.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.failed_attempts.len() as u32 + 1
    }
}

/// Limits applied to one failover run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverSettings {
    /// Maximum attempts (candidates tried) per run.
    pub max_fallbacks: usize,
    /// Time budget for each attempt.
    pub attempt_timeout: Duration,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self { max_fallbacks: DEFAULT_MAX_FALLBACKS, attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT }
    }
}

/// Provider clients keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet").field("kinds", &self.kinds()).finish()
    }
}

impl ProviderSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client under the kind it reports.
    pub fn insert(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.kind(), client);
    }

    /// Registers a client under an explicit kind.
    pub fn insert_as(&mut self, kind: ProviderKind, client: Arc<dyn ProviderClient>) {
        self.clients.insert(kind, client);
    }

    /// Client for `kind`, if registered.
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.get(&kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// True when no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl FromIterator<Arc<dyn ProviderClient>> for ProviderSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ProviderClient>>>(iter: I) -> Self {
        let mut set = Self::new();
        for client in iter {
            set.insert(client);
        }
        set
    }
}

/// Drives ranked candidates through provider calls.
#[derive(Debug)]
pub struct FailoverExecutor {
    providers: ProviderSet,
    usage: Arc<UsageTracker>,
    catalog: Option<Arc<ModelCatalog>>,
    settings: FailoverSettings,
}

enum AttemptResult {
    Success(ProviderResponse),
    Failure(FailureKind, String),
    Cancelled,
}

impl FailoverExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(providers: ProviderSet, usage: Arc<UsageTracker>, settings: FailoverSettings) -> Self {
        Self { providers, usage, catalog: None, settings }
    }

    /// Lets the executor park models whose credentials are rejected.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Registered providers.
    #[must_use]
    pub const fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Active limits.
    #[must_use]
    pub const fn settings(&self) -> FailoverSettings {
        self.settings
    }

    /// Tries candidates in order until one returns usable content.
    ///
    /// Candidates whose provider has no registered client are skipped without
    /// counting as attempts. The token is checked before every attempt and
    /// abandons the in-flight call when it fires.
    ///
    /// # Errors
    /// * `FailoverError::NoCandidates` - If no candidate could be attempted
    /// * `FailoverError::AllFallbacksExhausted` - If every attempt failed
    /// * `FailoverError::Cancelled` - If the token fired
    pub async fn execute(
        &self,
        candidates: &[ModelDescriptor],
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<FailoverOutcome, FailoverError> {
        self.execute_while(candidates, request, cancel, || std::future::ready(true)).await
    }

    /// [`FailoverExecutor::execute`] with an extra gate checked before every
    /// attempt.
    ///
    /// `proceed` is awaited right before each provider call; returning `false`
    /// stops the run as if the token had fired. Use it to observe cancellation
    /// that does not go through the token, such as a state change written to a
    /// shared store by another process.
    ///
    /// # Errors
    /// Same as `execute`; a refused gate yields `FailoverError::Cancelled`.
    pub async fn execute_while<F, Fut>(
        &self,
        candidates: &[ModelDescriptor],
        request: &ProviderRequest,
        cancel: &CancellationToken,
        mut proceed: F,
    ) -> Result<FailoverOutcome, FailoverError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        let mut failed: Vec<AttemptRecord> = Vec::new();

        for candidate in candidates {
            if failed.len() >= self.settings.max_fallbacks {
                debug!(max_fallbacks = self.settings.max_fallbacks, "Attempt limit reached");
                break;
            }
            if cancel.is_cancelled() {
                info!(attempts = failed.len(), "Failover cancelled before next attempt");
                return Err(FailoverError::Cancelled { attempts: failed });
            }
            let Some(client) = self.providers.get(candidate.id.provider) else {
                debug!(model_id = %candidate.id, "No client registered for provider; skipping");
                continue;
            };
            if !proceed().await || cancel.is_cancelled() {
                info!(attempts = failed.len(), "Failover stopped before next attempt");
                return Err(FailoverError::Cancelled { attempts: failed });
            }

            let model_id = &candidate.id;
            debug!(model_id = %model_id, attempt = failed.len() + 1, "Attempting model");
            self.usage.record_request(model_id);
            let started = Instant::now();

            match self.attempt(client.as_ref(), candidate, request, cancel).await {
                AttemptResult::Success(response) => {
                    self.usage.record_success(model_id);
                    let duration = started.elapsed();
                    info!(
                        model_id = %model_id,
                        attempts = failed.len() + 1,
                        duration_ms = duration.as_millis() as u64,
                        "Model attempt succeeded"
                    );
                    return Ok(FailoverOutcome {
                        model: candidate.clone(),
                        response,
                        failed_attempts: failed,
                        duration,
                    });
                }
                AttemptResult::Cancelled => {
                    info!(model_id = %model_id, "In-flight attempt abandoned on cancellation");
                    return Err(FailoverError::Cancelled { attempts: failed });
                }
                AttemptResult::Failure(kind, detail) => {
                    self.usage.record_failure(model_id);
                    warn!(model_id = %model_id, failure = ?kind, detail = %detail, "Model attempt failed");
                    if kind == FailureKind::AuthError {
                        if let Some(catalog) = &self.catalog {
                            catalog.mark_stale(model_id);
                        }
                    }
                    failed.push(AttemptRecord {
                        model_id: model_id.clone(),
                        failure: kind,
                        detail,
                        duration: started.elapsed(),
                    });
                }
            }
        }

        if failed.is_empty() {
            return Err(FailoverError::NoCandidates);
        }
        let err = FailoverError::AllFallbacksExhausted { attempts: failed };
        warn!(error = %err, "Failover exhausted");
        Err(err)
    }

    async fn attempt(
        &self,
        client: &dyn ProviderClient,
        candidate: &ModelDescriptor,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let timeout = self.settings.attempt_timeout;
        let call = tokio::time::timeout(timeout, client.execute(&candidate.id.model, request, timeout));

        tokio::select! {
            biased;
            () = cancel.cancelled() => AttemptResult::Cancelled,
            result = call => match result {
                Err(_elapsed) => AttemptResult::Failure(
                    FailureKind::Timeout,
                    format!("no response within {}s", timeout.as_secs_f64()),
                ),
                Ok(Err(e)) => AttemptResult::Failure(FailureKind::from(&e), e.to_string()),
                Ok(Ok(response)) if response.is_empty() => AttemptResult::Failure(
                    FailureKind::EmptyResponse,
                    format!("empty response ({} completion tokens)", response.completion_tokens),
                ),
                Ok(Ok(response)) => AttemptResult::Success(response),
            },
        }
    }
}
