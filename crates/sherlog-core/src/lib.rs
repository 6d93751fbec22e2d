//! Sherlog Core - Log models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout sherlog:
//! - Structured log records and their index metadata
//! - Record identity used for deduplication
//! - Common error types
//! - Shared traits for generation and notification backends
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, HistoryConfig, IndexConfig, LlmConfig, LlmProvider,
    LoggingConfig, NotificationConfig, RagConfig,
};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for sherlog operations
#[derive(Error, Debug)]
pub enum SherlogError {
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Index I/O error on {path}: {source}")]
    IndexIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("History error: {0}")]
    History(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SherlogError {
    /// Structural errors abort the affected operation; everything else is
    /// treated as a transient condition by the pipeline.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::CorruptIndex(_) | Self::InvalidVector(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SherlogError>;

// ============================================================================
// Log Models
// ============================================================================

/// The non-embedding fields of a log record.
///
/// This is what the vector index stores alongside each vector and what
/// search results project back out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetadata {
    /// Log line; `null` in the source is kept as `None`
    #[serde(default)]
    pub message: Option<String>,

    /// Event time, normalized to text whatever the source type was
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: String,

    /// Container that emitted the line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Severity level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Kubernetes namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,

    /// Any other fields returned by the telemetry backend
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogMetadata {
    /// Message text, with an absent message read as empty
    pub fn message_text(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn container_text(&self) -> &str {
        self.container_name.as_deref().unwrap_or("")
    }

    pub fn level_text(&self) -> &str {
        self.level.as_deref().unwrap_or("")
    }
}

/// A structured log record, optionally carrying its embedding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(flatten)]
    pub metadata: LogMetadata,

    /// Fixed-dimension embedding produced by an external model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl LogRecord {
    /// Create a record with a message and timestamp
    pub fn new(message: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            metadata: LogMetadata {
                message: Some(message.into()),
                timestamp: timestamp.into(),
                ..Default::default()
            },
            embedding: None,
        }
    }

    /// Set container name
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.metadata.container_name = Some(container.into());
        self
    }

    /// Set severity level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.metadata.level = Some(level.into());
        self
    }

    /// Set namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace_name = Some(namespace.into());
        self
    }

    /// Attach an embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn message_text(&self) -> &str {
        self.metadata.message_text()
    }
}

/// A nearest-neighbor hit: a copy of the stored metadata plus its distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub metadata: LogMetadata,

    /// Squared Euclidean distance to the query vector
    pub distance: f32,

    /// Insertion position of the entry in the index
    pub position: usize,
}

// ============================================================================
// Identity
// ============================================================================

/// Deduplication identity of a log: exact (message, timestamp) match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogIdentity {
    pub message: String,
    pub timestamp: String,
}

impl LogIdentity {
    pub fn new(message: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Anything that carries a log identity
pub trait Identified {
    fn identity(&self) -> LogIdentity;
}

impl Identified for LogMetadata {
    fn identity(&self) -> LogIdentity {
        LogIdentity::new(self.message_text(), self.timestamp.as_str())
    }
}

impl Identified for LogRecord {
    fn identity(&self) -> LogIdentity {
        self.metadata.identity()
    }
}

impl Identified for SearchResult {
    fn identity(&self) -> LogIdentity {
        self.metadata.identity()
    }
}

/// Accepts a string, number or null timestamp and renders it as text.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for text generation backends
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the prompt (non-streaming)
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Outbound chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub text: String,

    /// Optional structured blocks (Slack block kit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<serde_json::Value>,
}

impl NotificationMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: None,
        }
    }
}

/// Trait for notification sinks
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message; any error means the message was not delivered
    async fn send(&self, message: &NotificationMessage) -> Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
