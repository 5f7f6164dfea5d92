// Error types for orchestration

use relay_abstraction::ProviderError;
use relay_core::{StoreError, TransitionError};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Persistence failure, including refused transitions
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transition refused before reaching the store
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Provider construction failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The task has no open run to process, or another caller holds it
    #[error("Task {task_id} cannot be processed: {reason}")]
    NotRunnable { task_id: String, reason: &'static str },

    /// Configuration was unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker task panicked or was aborted
    #[error("Worker error: {0}")]
    Worker(String),
}

impl OrchestrationError {
    /// The underlying transition error, if this is one.
    #[must_use]
    pub fn as_transition(&self) -> Option<&TransitionError> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Store(err) => err.as_transition(),
            _ => None,
        }
    }
}
