//! Error types for the storage layer.

use thiserror::Error;

use crate::lifecycle::TransitionError;
use crate::models::TaskError;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No task with this id.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A task with this id already exists.
    #[error("Task already exists: {0}")]
    Duplicate(String),

    /// The task failed validation.
    #[error(transparent)]
    InvalidTask(#[from] TaskError),

    /// The requested status change is not allowed.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Database error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns the transition error, if this is one.
    #[must_use]
    pub const fn as_transition(&self) -> Option<&TransitionError> {
        match self {
            Self::Transition(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
