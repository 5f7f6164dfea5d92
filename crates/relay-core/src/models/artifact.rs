//! Artifacts produced by task processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::Part;

/// Typed description of what an artifact is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Output of a successful model invocation.
    Completion {
        /// Winning model, rendered `provider:model`.
        model_id: String,
        /// Provider that served the model.
        provider: String,
        /// Wall time of the winning attempt.
        duration_ms: u64,
        /// Completion tokens reported by the provider.
        completion_tokens: u32,
        /// Attempts made, including the winning one.
        attempts: u32,
    },
    /// A document attached by the caller or a tool.
    Document {
        /// Title, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Structured output with an optional schema reference.
    Structured {
        /// Schema identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
    },
}

/// Artifact metadata: a closed typed variant plus an open bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// The typed variant, flattened next to `extra`.
    #[serde(flatten)]
    pub kind: ArtifactKind,
    /// Anything else the producer wants to keep.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ArtifactMetadata {
    /// Metadata with an empty `extra` bag.
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind, extra: Map::new() }
    }

    /// Adds an entry to the `extra` bag.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// An immutable output attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier; re-appending the same id is a no-op.
    pub artifact_id: String,
    /// Content parts.
    pub parts: Vec<Part>,
    /// Typed metadata.
    pub metadata: ArtifactMetadata,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an artifact with a fresh id.
    pub fn new(parts: Vec<Part>, metadata: ArtifactMetadata) -> Self {
        Self { artifact_id: Uuid::new_v4().to_string(), parts, metadata, created_at: Utc::now() }
    }

    /// Uses an explicit artifact id.
    #[must_use]
    pub fn with_id(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = artifact_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_shape() {
        let meta = ArtifactMetadata::new(ArtifactKind::Completion {
            model_id: "openrouter:qwen/qwen3-coder:free".into(),
            provider: "openrouter".into(),
            duration_ms: 812,
            completion_tokens: 42,
            attempts: 3,
        })
        .with_extra("finish_reason", json!("stop"));

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["artifact_type"], "completion");
        assert_eq!(value["attempts"], 3);
        assert_eq!(value["extra"]["finish_reason"], "stop");

        let back: ArtifactMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_document_without_extra() {
        let value = json!({"artifact_type": "document", "title": "Q3 report"});
        let meta: ArtifactMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(meta.kind, ArtifactKind::Document { title: Some("Q3 report".into()) });
        assert!(meta.extra.is_empty());
    }
}
