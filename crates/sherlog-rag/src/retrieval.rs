//! Multi-query nearest-neighbor retrieval

use std::collections::HashSet;

use sherlog_core::{Identified, LogIdentity, LogRecord, Result, SearchResult};
use sherlog_vector::VectorIndex;
use tracing::debug;

/// Deduplicated union of search results, first occurrence wins
#[derive(Debug, Clone, Default)]
pub struct NeighborSet {
    results: Vec<SearchResult>,
    seen: HashSet<LogIdentity>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result unless its identity is already present
    pub fn insert(&mut self, result: SearchResult) -> bool {
        if self.seen.insert(result.identity()) {
            self.results.push(result);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchResult> {
        self.results.iter()
    }

    pub fn as_slice(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn into_vec(self) -> Vec<SearchResult> {
        self.results
    }
}

impl Extend<SearchResult> for NeighborSet {
    fn extend<I: IntoIterator<Item = SearchResult>>(&mut self, iter: I) {
        for result in iter {
            self.insert(result);
        }
    }
}

impl FromIterator<SearchResult> for NeighborSet {
    fn from_iter<I: IntoIterator<Item = SearchResult>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Runs one index query per embedded record and merges the hits
pub struct Retriever<'a> {
    index: &'a VectorIndex,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a VectorIndex) -> Self {
        Self { index }
    }

    /// Records without an embedding are skipped. A failing query fails the
    /// whole retrieval.
    pub fn retrieve(&self, batch: &[LogRecord], k: usize) -> Result<NeighborSet> {
        let mut neighbors = NeighborSet::new();
        let mut queries = 0usize;

        for embedding in batch.iter().filter_map(|record| record.embedding.as_deref()) {
            neighbors.extend(self.index.search(embedding, k)?);
            queries += 1;
        }

        debug!(
            batch = batch.len(),
            queries,
            neighbors = neighbors.len(),
            "Retrieved similar logs"
        );
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sherlog_core::SherlogError;
    use tempfile::TempDir;

    fn record(message: &str, timestamp: &str, vector: Vec<f32>) -> LogRecord {
        LogRecord::new(message, timestamp).with_embedding(vector)
    }

    fn index_with(dir: &TempDir, records: &[LogRecord]) -> VectorIndex {
        let mut index = VectorIndex::open(dir.path().join("index.bin")).unwrap();
        index.insert_records(records).unwrap();
        index
    }

    #[test]
    fn test_merge_dedups_overlap() {
        let dir = TempDir::new().unwrap();
        // Two clusters sharing the "shared" entry as a neighbor of both
        let index = index_with(
            &dir,
            &[
                record("a1", "1", vec![0.0, 0.0]),
                record("a2", "2", vec![0.0, 1.0]),
                record("shared", "3", vec![5.0, 0.0]),
                record("b1", "4", vec![10.0, 0.0]),
                record("b2", "5", vec![10.0, 1.0]),
            ],
        );

        let batch = vec![
            LogRecord::new("q1", "q").with_embedding(vec![0.0, 0.5]),
            LogRecord::new("q2", "q").with_embedding(vec![10.0, 0.5]),
        ];
        let neighbors = Retriever::new(&index).retrieve(&batch, 3).unwrap();

        assert_eq!(neighbors.len(), 5);
        let messages: Vec<_> = neighbors.iter().map(|r| r.metadata.message_text()).collect();
        assert_eq!(messages[..3], ["a1", "a2", "shared"]);
        assert!(messages[3..].contains(&"b1"));
        assert!(messages[3..].contains(&"b2"));
    }

    #[test]
    fn test_identity_dedup_across_positions() {
        let dir = TempDir::new().unwrap();
        // Same identity stored twice at different positions
        let index = index_with(
            &dir,
            &[
                record("dup", "t", vec![0.0]),
                record("dup", "t", vec![0.1]),
                record("other", "t", vec![0.2]),
            ],
        );

        let batch = vec![LogRecord::new("q", "q").with_embedding(vec![0.0])];
        let neighbors = Retriever::new(&index).retrieve(&batch, 3).unwrap();

        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors.as_slice()[0].position, 0);
        assert_eq!(neighbors.as_slice()[1].metadata.message_text(), "other");
    }

    #[test]
    fn test_records_without_embedding_skipped() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[record("a", "1", vec![1.0, 1.0])]);

        let batch = vec![
            LogRecord::new("no vector", "q"),
            LogRecord::new("q", "q").with_embedding(vec![1.0, 1.0]),
        ];
        let neighbors = Retriever::new(&index).retrieve(&batch, 5).unwrap();

        assert_eq!(neighbors.len(), 1);
    }

    #[test]
    fn test_no_embeddings_never_queries() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[record("a", "1", vec![1.0, 1.0])]);

        // A mismatched query would error if the index were consulted
        let neighbors = Retriever::new(&index)
            .retrieve(&[LogRecord::new("plain", "q")], 5)
            .unwrap();
        assert!(neighbors.is_empty());

        let neighbors = Retriever::new(&index).retrieve(&[], 5).unwrap();
        assert!(neighbors.is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch_fails() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[record("a", "1", vec![1.0, 1.0])]);

        let batch = vec![LogRecord::new("q", "q").with_embedding(vec![1.0, 1.0, 1.0])];
        let result = Retriever::new(&index).retrieve(&batch, 5);

        assert!(matches!(result, Err(SherlogError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_empty_index_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(dir.path().join("index.bin")).unwrap();

        let batch = vec![LogRecord::new("q", "q").with_embedding(vec![1.0])];
        let neighbors = Retriever::new(&index).retrieve(&batch, 5).unwrap();

        assert!(neighbors.is_empty());
    }

    #[test]
    fn test_neighbor_set_first_wins() {
        let metadata = LogRecord::new("m", "t").with_level("ERROR").metadata;
        let hit = |distance: f32, position: usize| SearchResult {
            metadata: metadata.clone(),
            distance,
            position,
        };

        let mut set = NeighborSet::new();
        assert!(set.insert(hit(0.5, 3)));
        assert!(!set.insert(hit(0.1, 7)));

        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].position, 3);
    }
}
