//! Flat nearest-neighbor index over log embeddings
//!
//! Append-only: positions are assigned at insert time and never reused.
//! Every successful insert is written through to disk before returning.

use std::cmp::Ordering;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sherlog_core::{IndexConfig, LogMetadata, LogRecord, Result, SearchResult, SherlogError};

use crate::store::{self, IndexPaths};

/// A vector and the metadata stored with it
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub metadata: LogMetadata,
}

impl IndexEntry {
    pub fn new(vector: Vec<f32>, metadata: LogMetadata) -> Self {
        Self { vector, metadata }
    }

    /// Split a record into its embedding and metadata
    pub fn from_record(record: &LogRecord) -> Result<Self> {
        let vector = record.embedding.clone().ok_or_else(|| {
            SherlogError::Validation(format!(
                "record at {:?} has no embedding",
                record.metadata.timestamp
            ))
        })?;
        Ok(Self::new(vector, record.metadata.clone()))
    }
}

/// Summary of an index for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub dimension: Option<usize>,
    pub total_vectors: usize,
    pub vector_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Persistent squared-L2 index with a parallel metadata sequence.
///
/// Not internally synchronized: share it behind a `RwLock` when readers and
/// writers run on different threads. Two processes writing the same path
/// race and the last save wins.
///
/// Each save replaces the vector file and then the metadata file. Either
/// file is swapped atomically, the pair is not: a crash between the two
/// renames leaves a new vector file next to the old metadata, and the next
/// open fails with `CorruptIndex`. Recover by renaming the leftover
/// `<path>.meta.tmp` over `<path>.meta`, or delete both files and re-ingest.
#[derive(Debug)]
pub struct VectorIndex {
    paths: IndexPaths,
    dimension: Option<usize>,
    /// Row-major, `dimension` floats per entry
    vectors: Vec<f32>,
    metadata: Vec<LogMetadata>,
}

impl VectorIndex {
    /// Restore the index at `path`, or start empty when no files exist there
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let paths = IndexPaths::new(path);

        let index = match store::load(&paths)? {
            Some(loaded) => {
                tracing::info!(
                    path = %paths.vectors.display(),
                    vectors = loaded.metadata.len(),
                    dimension = loaded.dimension,
                    "Loaded vector index"
                );
                Self {
                    paths,
                    dimension: Some(loaded.dimension),
                    vectors: loaded.vectors,
                    metadata: loaded.metadata,
                }
            }
            None => {
                tracing::info!(
                    path = %paths.vectors.display(),
                    "No existing index found, will create on first insert"
                );
                Self {
                    paths,
                    dimension: None,
                    vectors: Vec::new(),
                    metadata: Vec::new(),
                }
            }
        };

        Ok(index)
    }

    /// Open from config, checking the restored width against `expected_dimension`
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let index = Self::open(&config.path)?;

        if let (Some(expected), Some(actual)) = (config.expected_dimension, index.dimension) {
            if expected != actual {
                return Err(SherlogError::DimensionMismatch { expected, actual });
            }
        }

        Ok(index)
    }

    /// Vector width, fixed by the first insert
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.paths.vectors
    }

    pub fn metadata_path(&self) -> &Path {
        &self.paths.metadata
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            dimension: self.dimension,
            total_vectors: self.len(),
            vector_path: self.paths.vectors.clone(),
            metadata_path: self.paths.metadata.clone(),
        }
    }

    /// Stored vector and metadata at `position`
    pub fn get(&self, position: usize) -> Option<(&[f32], &LogMetadata)> {
        let dimension = self.dimension?;
        let metadata = self.metadata.get(position)?;
        let start = position * dimension;
        Some((&self.vectors[start..start + dimension], metadata))
    }

    /// Append a batch and persist it.
    ///
    /// The whole batch is validated first; on any validation or write error
    /// the index is left exactly as it was. Returns the assigned positions.
    pub fn insert(&mut self, entries: Vec<IndexEntry>) -> Result<Range<usize>> {
        let start = self.len();
        let Some(first) = entries.first() else {
            return Ok(start..start);
        };

        let dimension = self.dimension.unwrap_or(first.vector.len());
        for entry in &entries {
            validate_vector(&entry.vector, dimension)?;
        }

        let previous_dimension = self.dimension;
        let previous_values = self.vectors.len();

        self.vectors.reserve(entries.len() * dimension);
        self.metadata.reserve(entries.len());
        for entry in entries {
            self.vectors.extend_from_slice(&entry.vector);
            self.metadata.push(entry.metadata);
        }
        self.dimension = Some(dimension);

        if let Err(e) = store::write(&self.paths, dimension, &self.vectors, &self.metadata) {
            self.vectors.truncate(previous_values);
            self.metadata.truncate(start);
            self.dimension = previous_dimension;
            tracing::error!(error = %e, "Failed to persist index, insert rolled back");
            return Err(e);
        }

        if previous_dimension.is_none() {
            tracing::info!(dimension, "Created new vector index");
        }
        tracing::info!(
            added = self.len() - start,
            total = self.len(),
            path = %self.paths.vectors.display(),
            "Index and metadata saved"
        );

        Ok(start..self.len())
    }

    /// Insert records that carry embeddings; any record without one fails the batch
    pub fn insert_records(&mut self, records: &[LogRecord]) -> Result<Range<usize>> {
        let entries = records
            .iter()
            .map(IndexEntry::from_record)
            .collect::<Result<Vec<_>>>()?;
        self.insert(entries)
    }

    /// Up to `k` nearest entries by squared Euclidean distance.
    ///
    /// Ordered by distance, ties by insertion position. An empty index
    /// returns an empty result rather than an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let Some(dimension) = self.dimension.filter(|_| !self.is_empty()) else {
            tracing::warn!("No vectors in index");
            return Ok(Vec::new());
        };

        validate_vector(query, dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .chunks_exact(dimension)
            .enumerate()
            .map(|(position, row)| (squared_l2(query, row), position))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_scored);
            scored.truncate(k);
        }
        scored.sort_unstable_by(compare_scored);

        Ok(scored
            .into_iter()
            .map(|(distance, position)| SearchResult {
                metadata: self.metadata[position].clone(),
                distance,
                position,
            })
            .collect())
    }
}

fn compare_scored(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(SherlogError::InvalidVector("empty vector".to_string()));
    }
    if vector.len() != dimension {
        return Err(SherlogError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if let Some(i) = vector.iter().position(|v| !v.is_finite()) {
        return Err(SherlogError::InvalidVector(format!(
            "non-finite value at component {i}"
        )));
    }
    Ok(())
}
