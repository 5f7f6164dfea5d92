//! Conversation messages exchanged within a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The orchestrator acting on the caller's behalf.
    Agent,
}

/// A file attached to a message or artifact, either by reference or inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileContent {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Location of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Base64-encoded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

/// One piece of message or artifact content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A file.
    File {
        /// The file.
        file: FileContent,
    },
    /// Structured JSON data.
    Data {
        /// The payload.
        data: Value,
    },
}

impl Part {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An immutable entry in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier; re-appending the same id is a no-op.
    pub message_id: String,
    /// Author.
    pub role: Role,
    /// Content parts in order.
    pub parts: Vec<Part>,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Owning task. Filled in when the message is appended.
    #[serde(default)]
    pub task_id: String,
    /// Owning context. Filled in when the message is appended.
    #[serde(default)]
    pub context_id: String,
}

impl Message {
    /// Creates a message with a fresh id.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
            task_id: String::new(),
            context_id: String::new(),
        }
    }

    /// Creates a single-part text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    /// Uses an explicit message id.
    #[must_use]
    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Concatenated text of all text parts, separated by newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect::<Vec<_>>().join("\n")
    }

    /// Returns true when the message has at least one non-blank text part.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.parts.iter().filter_map(Part::as_text).any(|t| !t.trim().is_empty())
    }
}
