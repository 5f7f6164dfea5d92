//! Data models for Relay Core.

pub mod artifact;
pub mod message;
pub mod task;

pub use artifact::{Artifact, ArtifactKind, ArtifactMetadata};
pub use message::{FileContent, Message, Part, Role};
pub use task::{Task, TaskBuilder, TaskError, TaskId, TaskKind, TaskState, TaskStatus};
