//! Sherlog Vector - Similarity index and embeddings
//!
//! Provides the persistent nearest-neighbor index that stores past log
//! events, plus the clients that turn log records into vectors.

pub mod cache;
pub mod embedding;
pub mod index;
mod store;

pub use cache::{CacheStats, CacheStatsReport, EmbeddingCache};
pub use embedding::{
    create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiEmbedding, RecordEmbedder,
};
pub use index::{IndexEntry, IndexStats, VectorIndex};
pub use store::IndexPaths;
