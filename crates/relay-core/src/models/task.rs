//! Task data structures for Relay Core.
//!
//! A task is the unit of work tracked through its lifecycle. It carries an
//! append-only conversation history and an append-only artifact trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Artifact, Message};

/// Identifier of a task.
pub type TaskId = String;

/// Lifecycle state of a task.
///
/// The serialized names form the external vocabulary and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Accepted but not started.
    #[default]
    Submitted,
    /// A worker is processing the task.
    Working,
    /// Paused until the caller supplies more input.
    InputRequired,
    /// Finished with a result.
    Completed,
    /// Stopped on request.
    Canceled,
    /// Finished without a result.
    Failed,
    /// Refused before any work started.
    Rejected,
    /// Paused until the caller supplies credentials.
    AuthRequired,
    /// State could not be determined (e.g. recovered from a foreign record).
    Unknown,
}

impl TaskState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Submitted,
        Self::Working,
        Self::InputRequired,
        Self::Completed,
        Self::Canceled,
        Self::Failed,
        Self::Rejected,
        Self::AuthRequired,
        Self::Unknown,
    ];

    /// Returns the external name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::AuthRequired => "auth-required",
            Self::Unknown => "unknown",
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| TaskError::InvalidTask(format!("unknown task state '{s}'")))
    }
}

/// Current status of a task: state plus an optional human-readable note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Lifecycle state.
    pub state: TaskState,
    /// Explanation attached to the last transition.
    pub message: Option<String>,
    /// When the status was last set.
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Creates a status stamped with the current time.
    pub fn new(state: TaskState, message: Option<String>) -> Self {
        Self { state, message, timestamp: Utc::now() }
    }
}

/// Discriminator written into every persisted task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// The only record kind.
    #[default]
    Task,
}

/// A unit of work moving through the task lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for the task.
    pub id: TaskId,
    /// Conversation context the task belongs to. Set once at creation.
    pub context_id: String,
    /// Always `"task"`.
    #[serde(default)]
    pub kind: TaskKind,
    /// Current status.
    pub status: TaskStatus,
    /// Append-only conversation history, in production order.
    #[serde(default)]
    pub history: Vec<Message>,
    /// Append-only artifact trail, in production order.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Agent responsible for the task, if any.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    /// Scheduling priority; higher runs first where a scheduler cares.
    #[serde(default)]
    pub priority: i32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// First time the task entered `working`.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a submitted task with fresh identifiers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a task.
    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.status.state
    }

    /// Validates the task data.
    ///
    /// # Errors
    /// * `TaskError::InvalidTask` - If `id` or `context_id` is empty
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::InvalidTask("id cannot be empty".to_string()));
        }
        if self.context_id.trim().is_empty() {
            return Err(TaskError::InvalidTask("context_id cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Validates a task about to be stored for the first time.
    ///
    /// New tasks enter the lifecycle as `submitted` with no artifacts and no
    /// start or completion time; everything after that goes through status
    /// updates.
    ///
    /// # Errors
    /// * `TaskError::InvalidTask` - If the task fails [`Task::validate`] or has already progressed
    pub fn validate_new(&self) -> Result<(), TaskError> {
        self.validate()?;
        if self.status.state != TaskState::Submitted {
            return Err(TaskError::InvalidTask(format!(
                "new tasks must be submitted, not {}",
                self.status.state
            )));
        }
        if !self.artifacts.is_empty() {
            return Err(TaskError::InvalidTask("new tasks cannot carry artifacts".to_string()));
        }
        if self.started_at.is_some() || self.completed_at.is_some() {
            return Err(TaskError::InvalidTask("new tasks cannot have started".to_string()));
        }
        Ok(())
    }

    /// Returns true if a message with this id is already in the history.
    #[must_use]
    pub fn has_message(&self, message_id: &str) -> bool {
        self.history.iter().any(|m| m.message_id == message_id)
    }

    /// Returns true if an artifact with this id is already recorded.
    #[must_use]
    pub fn has_artifact(&self, artifact_id: &str) -> bool {
        self.artifacts.iter().any(|a| a.artifact_id == artifact_id)
    }

    /// Appends a message unless one with the same id exists.
    ///
    /// The message is stamped with this task's identifiers. Returns whether
    /// the history grew.
    pub fn push_message(&mut self, mut message: Message) -> bool {
        if self.has_message(&message.message_id) {
            return false;
        }
        message.task_id.clone_from(&self.id);
        message.context_id.clone_from(&self.context_id);
        self.history.push(message);
        true
    }

    /// Appends an artifact unless one with the same id exists.
    pub fn push_artifact(&mut self, artifact: Artifact) -> bool {
        if self.has_artifact(&artifact.artifact_id) {
            return false;
        }
        self.artifacts.push(artifact);
        true
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Task`].
#[derive(Debug, Default)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    context_id: Option<String>,
    assigned_agent: Option<String>,
    priority: i32,
    history: Vec<Message>,
}

impl TaskBuilder {
    /// Uses an explicit task id instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Joins an existing conversation context.
    #[must_use]
    pub fn context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Assigns the task to an agent.
    #[must_use]
    pub fn assigned_agent(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Seeds the history with an initial message.
    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.history.push(message);
        self
    }

    /// Builds a task in the `submitted` state.
    #[must_use]
    pub fn build(self) -> Task {
        let now = Utc::now();
        let mut task = Task {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            context_id: self.context_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: TaskKind::Task,
            status: TaskStatus { state: TaskState::Submitted, message: None, timestamp: now },
            history: Vec::with_capacity(self.history.len()),
            artifacts: Vec::new(),
            assigned_agent: self.assigned_agent,
            priority: self.priority,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        for message in self.history {
            task.push_message(message);
        }
        task
    }
}

/// Errors related to task data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Invalid task data.
    #[error("Invalid task: {0}")]
    InvalidTask(String),
}
