//! Sherlog Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for local development against Ollama.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vector index location
    pub index: IndexConfig,

    /// Generation provider configuration
    pub llm: LlmConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Retrieval pipeline configuration
    pub rag: RagConfig,

    /// Chat notification
    pub notification: NotificationConfig,

    /// Diagnosis history file
    pub history: HistoryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    /// Parse a TOML document; missing sections and keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Index
        if let Some(path) = env_var("INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(dim) = env_parse::<usize>("INDEX_DIMENSION")? {
            self.index.expected_dimension = Some(dim);
        }

        // LLM
        if let Some(provider) = env_parse::<LlmProvider>("LLM_PROVIDER")? {
            self.llm.provider = provider;
        }
        if let Some(url) = env_var("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Some(model) = env_var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = env_var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(url) = env_var("OPENAI_BASE_URL") {
            self.llm.openai_base_url = Some(url);
        }
        if let Some(attempts) = env_parse::<u32>("LLM_MAX_ATTEMPTS")? {
            self.llm.max_attempts = attempts;
        }

        // Embedding
        if let Some(model) = env_var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(size) = env_parse::<usize>("EMBEDDING_BATCH_SIZE")? {
            self.embedding.batch_size = size;
        }
        if let Some(fields) = env_var("EMBEDDING_FIELDS") {
            self.embedding.fields = split_list(&fields);
        }

        // RAG
        if let Some(k) = env_parse::<usize>("RAG_TOP_K")? {
            self.rag.top_k = k;
        }
        if let Some(size) = env_parse::<usize>("RAG_BATCH_SIZE")? {
            self.rag.batch_size = size;
        }

        // Notification
        if let Some(flag) = env_var("SLACK_NOTIFY") {
            self.notification.enabled = flag.eq_ignore_ascii_case("true");
        }
        if let Some(url) = env_var("SLACK_WEBHOOK_URL") {
            self.notification.slack_webhook_url = Some(url);
        }

        // History
        if let Some(path) = env_var("HISTORY_PATH") {
            self.history.path = PathBuf::from(path);
        }

        // Logging
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector store file; metadata lives next to it at `<path>.meta`
    pub path: PathBuf,

    /// Expected vector width; checked against a restored index
    pub expected_dimension: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sherlog_index.bin"),
            expected_dimension: None,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible APIs)
    pub openai_base_url: Option<String>,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Attempts before falling back to the sentinel output
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay
    pub max_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            openai_api_key: None,
            openai_base_url: None,
            max_tokens: 2048,
            temperature: 0.1,
            timeout_secs: 60,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

/// Supported LLM and embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAI,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider serving the embedding model
    pub provider: LlmProvider,

    /// Embedding model name
    pub model: String,

    /// Texts sent per embedding request
    pub batch_size: usize,

    /// Record fields concatenated into the embedded text
    pub fields: Vec<String>,

    /// Maximum cached embeddings
    pub cache_capacity: u64,

    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            model: "all-minilm".to_string(),
            batch_size: 32,
            fields: vec!["message".to_string()],
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

/// RAG pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Neighbors retrieved per batch record
    pub top_k: usize,

    /// Records sent to the model per diagnosis
    pub batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            batch_size: 5,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send diagnoses to Slack
    pub enabled: bool,

    /// Slack incoming-webhook URL
    pub slack_webhook_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            slack_webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// Diagnosis history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// JSON file the diagnoses are appended to
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rca_history.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for crate::SherlogError {
    fn from(e: ConfigError) -> Self {
        crate::SherlogError::Config(e.to_string())
    }
}
