//! Embedding clients for turning log records into vectors
//!
//! Supports Ollama and OpenAI embedding APIs. `RecordEmbedder` builds the
//! text of each record from the configured fields and attaches the result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sherlog_core::{EmbeddingConfig, LlmConfig, LlmProvider, LogRecord, Result, SherlogError};

use crate::cache::EmbeddingCache;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SherlogError::Embedding(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(embedding: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = llm
            .openai_api_key
            .as_ref()
            .ok_or_else(|| SherlogError::Config("OpenAI API key required".to_string()))?;

        let mut client = Self::new(api_key.clone(), embedding.model.clone());
        client.client = http_client(llm.timeout_secs)?;
        if let Some(url) = &llm.openai_base_url {
            client.base_url = url.clone();
        }
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| SherlogError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SherlogError::Embedding(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SherlogError::Embedding(format!(
                "OpenAI embedding error ({status}): {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            SherlogError::Embedding(format!("Failed to parse embedding response: {e}"))
        })?;

        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "all-minilm" => 384,
            "mxbai-embed-large" => 1024,
            _ => 768,
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(embedding: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let mut client = Self::new(llm.ollama_url.clone(), embedding.model.clone());
        client.client = http_client(llm.timeout_secs)?;
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                SherlogError::Embedding(format!("Ollama embedding request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SherlogError::Embedding(format!(
                "Ollama embedding error ({status}): {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            SherlogError::Embedding(format!("Failed to parse embedding response: {e}"))
        })?;

        Ok(result.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama has no batch endpoint here, so requests go out sequentially
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(
    embedding: &EmbeddingConfig,
    llm: &LlmConfig,
) -> Result<Arc<dyn EmbeddingClient>> {
    match embedding.provider {
        LlmProvider::OpenAI => Ok(Arc::new(OpenAiEmbedding::from_config(embedding, llm)?)),
        LlmProvider::Ollama => Ok(Arc::new(OllamaEmbedding::from_config(embedding, llm)?)),
    }
}

// ============================================================================
// Record Embedder
// ============================================================================

/// Attaches embeddings to log records
pub struct RecordEmbedder {
    client: Arc<dyn EmbeddingClient>,
    cache: Option<EmbeddingCache>,
    fields: Vec<String>,
    batch_size: usize,
}

impl RecordEmbedder {
    pub fn new(client: Arc<dyn EmbeddingClient>, fields: Vec<String>, batch_size: usize) -> Self {
        Self {
            client,
            cache: None,
            fields,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the client and cache described by config
    pub fn from_config(embedding: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let client = create_embedding_client(embedding, llm)?;
        tracing::info!(
            model = %embedding.model,
            batch_size = embedding.batch_size,
            fields = ?embedding.fields,
            "Record embedder initialized"
        );
        Ok(
            Self::new(client, embedding.fields.clone(), embedding.batch_size)
                .with_cache(EmbeddingCache::with_config(embedding)),
        )
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    pub fn dimension(&self) -> usize {
        self.client.dimension()
    }

    /// Text that represents a record: the present configured fields joined by a space
    pub fn text_for(&self, record: &LogRecord) -> String {
        let meta = &record.metadata;
        self.fields
            .iter()
            .filter_map(|field| match field.as_str() {
                "message" => meta.message.clone(),
                "timestamp" => Some(meta.timestamp.clone()).filter(|t| !t.is_empty()),
                "container_name" => meta.container_name.clone(),
                "level" => meta.level.clone(),
                "namespace_name" => meta.namespace_name.clone(),
                other => match meta.extra.get(other) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(serde_json::Value::String(s)) => Some(s.clone()),
                    Some(value) => Some(value.to_string()),
                },
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Embed free text, going through the cache
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(text).await {
                return Ok(hit);
            }
        }
        let embedding = self.client.embed(text).await?;
        if let Some(cache) = &self.cache {
            cache.put(text, embedding.clone()).await;
        }
        Ok(embedding)
    }

    /// Attach an embedding to every record
    pub async fn embed_records(&self, mut records: Vec<LogRecord>) -> Result<Vec<LogRecord>> {
        let texts: Vec<String> = records.iter().map(|r| self.text_for(r)).collect();
        tracing::info!("Embedding {} logs", texts.len());

        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut pending: Vec<String> = Vec::new();
        for text in &texts {
            if resolved.contains_key(text) || pending.contains(text) {
                continue;
            }
            match self.cached(text).await {
                Some(embedding) => {
                    resolved.insert(text.clone(), embedding);
                }
                None => pending.push(text.clone()),
            }
        }

        for chunk in pending.chunks(self.batch_size) {
            let embeddings = self.client.embed_batch(chunk).await?;
            if embeddings.len() != chunk.len() {
                return Err(SherlogError::Embedding(format!(
                    "requested {} embeddings, received {}",
                    chunk.len(),
                    embeddings.len()
                )));
            }
            for (text, embedding) in chunk.iter().zip(embeddings) {
                if let Some(cache) = &self.cache {
                    cache.put(text, embedding.clone()).await;
                }
                resolved.insert(text.clone(), embedding);
            }
        }

        for (record, text) in records.iter_mut().zip(&texts) {
            record.embedding = resolved.get(text).cloned();
        }

        tracing::info!(
            requested = pending.len(),
            cached = resolved.len() - pending.len(),
            "Embedding complete"
        );
        Ok(records)
    }

    async fn cached(&self, text: &str) -> Option<Vec<f32>> {
        match &self.cache {
            Some(cache) => cache.get(text).await,
            None => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
