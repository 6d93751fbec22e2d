//! Embedding cache
//!
//! Log streams repeat the same lines constantly, so embeddings are cached by
//! their exact input text. Uses the moka crate for a concurrent,
//! async-compatible cache with capacity and TTL bounds.

use moka::future::Cache;
use serde::Serialize;
use sherlog_core::EmbeddingConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache of embedding vectors keyed by the embedded text
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<String, Vec<f32>>,
    stats: Arc<CacheStats>,
}

impl EmbeddingCache {
    /// Create a new embedding cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&EmbeddingConfig::default())
    }

    /// Create a new embedding cache sized from config
    pub fn with_config(config: &EmbeddingConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Get an embedding from cache
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let result = self.cache.get(text).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store an embedding in cache
    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        self.cache.insert(text.to_string(), embedding).await;
        self.stats.record_write();
    }

    /// Clear all cached embeddings
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Hit/miss counters for a cache
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub hit_rate: f64,
}
