//! Scripted in-process provider.
//!
//! Used by tests and by the CLI's `--mock` mode. Each model id can be given a
//! queue of replies; once a queue is drained the provider falls back to
//! echoing the last user message.

use async_trait::async_trait;
use relay_abstraction::{
    ChatRole, ProviderClient, ProviderError, ProviderKind, ProviderRequest, ProviderResponse,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One scripted outcome for a mock invocation.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful response with this content.
    Content(String),
    /// Successful transport, but nothing usable in the body.
    Empty,
    /// The invocation fails with this error.
    Error(ProviderError),
    /// Wait before producing the inner reply. Exceeding the attempt timeout
    /// yields `ProviderError::Timeout`.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience constructor for a delayed reply.
    #[must_use]
    pub fn delayed(delay: Duration, reply: Self) -> Self {
        Self::Delay(delay, Box::new(reply))
    }
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<String>,
}

/// Provider that answers from per-model scripts.
#[derive(Debug)]
pub struct MockProvider {
    kind: ProviderKind,
    state: Mutex<MockState>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(ProviderKind::Mock)
    }
}

impl MockProvider {
    /// Creates a mock that reports itself as `kind`.
    ///
    /// Impersonating a real provider kind lets failover tests route through
    /// catalog entries for that provider.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind, state: Mutex::new(MockState::default()) }
    }

    /// Queues replies for a model, consumed in order.
    #[must_use]
    pub fn with_script(self, model_id: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.lock().scripts.entry(model_id.into()).or_default().extend(replies);
        self
    }

    /// Queues a single reply for a model.
    pub fn push_reply(&self, model_id: impl Into<String>, reply: MockReply) {
        self.lock().scripts.entry(model_id.into()).or_default().push_back(reply);
    }

    /// Model ids in the order they were invoked.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, model_id: &str, request: &ProviderRequest) -> MockReply {
        let mut state = self.lock();
        state.calls.push(model_id.to_string());
        state
            .scripts
            .get_mut(model_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockReply::Content(echo(request)))
    }
}

fn echo(request: &ProviderRequest) -> String {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map_or("", |m| m.content.as_str());
    format!("Mock response for: {last_user}")
}

async fn resolve(
    reply: MockReply,
    model_id: &str,
    timeout: Duration,
) -> Result<ProviderResponse, ProviderError> {
    let mut reply = reply;
    let mut waited = Duration::ZERO;
    loop {
        match reply {
            MockReply::Content(content) => {
                let completion_tokens = content.split_whitespace().count().max(1) as u32;
                return Ok(ProviderResponse {
                    content,
                    completion_tokens,
                    raw_metadata: json!({ "model": model_id, "mock": true }),
                });
            }
            MockReply::Empty => {
                return Ok(ProviderResponse {
                    content: String::new(),
                    completion_tokens: 0,
                    raw_metadata: json!({ "model": model_id, "mock": true }),
                });
            }
            MockReply::Error(err) => return Err(err),
            MockReply::Delay(delay, inner) => {
                let remaining = timeout.saturating_sub(waited);
                if delay > remaining {
                    tokio::time::sleep(remaining).await;
                    return Err(ProviderError::Timeout(format!(
                        "mock model {model_id} exceeded {}s",
                        timeout.as_secs_f64()
                    )));
                }
                tokio::time::sleep(delay).await;
                waited += delay;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn execute(
        &self,
        model_id: &str,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let reply = self.next_reply(model_id, request);
        debug!(model_id = %model_id, reply = ?reply, "MockProvider answering");
        resolve(reply, model_id, timeout).await
    }
}
