//! Task persistence for Relay Core.
//!
//! [`TaskStore`] is the capability the orchestrator persists through. Two
//! backends ship with the crate: [`MemoryTaskStore`] for tests and one-shot
//! runs, and [`SqliteTaskStore`] for durable storage.
//!
//! Both backends serialize mutations per task id, validate every status change
//! against the lifecycle graph, and treat re-appending an existing message or
//! artifact id as a no-op.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{Artifact, Message, Task, TaskId, TaskState};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Persistence capability for tasks.
///
/// Implementations must be safe under concurrent calls for the same task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    /// * `StoreError::Duplicate` - If the id is taken
    /// * `StoreError::InvalidTask` - If the task fails validation
    async fn create(&self, task: Task) -> StoreResult<TaskId>;

    /// Loads a task with its full history and artifacts.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    async fn get(&self, id: &str) -> StoreResult<Task>;

    /// Moves a task to a new state and returns the updated task.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    /// * `StoreError::Transition` - If the edge is illegal or the task is terminal
    async fn update_status(
        &self,
        id: &str,
        state: TaskState,
        message: Option<String>,
    ) -> StoreResult<Task>;

    /// Appends a message to the task history.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    async fn append_message(&self, id: &str, message: Message) -> StoreResult<()>;

    /// Appends an artifact to the task.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    async fn append_artifact(&self, id: &str, artifact: Artifact) -> StoreResult<()>;

    /// Lists all tasks, newest first.
    async fn list(&self) -> StoreResult<Vec<Task>>;

    /// Removes a task and its logs.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    async fn delete(&self, id: &str) -> StoreResult<()>;
}
