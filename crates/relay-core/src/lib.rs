//! Core task model and persistence for Relay.
//!
//! - [`models`]: tasks, messages, and artifacts
//! - [`lifecycle`]: the task state machine
//! - [`storage`]: the [`TaskStore`] capability and its backends

pub mod lifecycle;
pub mod models;
pub mod storage;

pub use lifecycle::{TaskStateMachine, TransitionError};
pub use models::{
    Artifact, ArtifactKind, ArtifactMetadata, FileContent, Message, Part, Role, Task, TaskBuilder,
    TaskError, TaskId, TaskKind, TaskState, TaskStatus,
};
pub use storage::{MemoryTaskStore, SqliteTaskStore, StoreError, StoreResult, TaskStore};
