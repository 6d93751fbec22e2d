//! On-disk layout of the vector index
//!
//! Two co-located files: `<path>` holds the vectors as one flat row-major
//! `f32` array (bincode), `<path>.meta` holds the metadata sequence (JSON).
//! Both are written to temp files, synced, then renamed into place.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sherlog_core::{LogMetadata, Result, SherlogError};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct VectorSnapshotRef<'a> {
    version: u32,
    dimension: u64,
    count: u64,
    data: &'a [f32],
}

#[derive(Deserialize)]
struct VectorSnapshot {
    version: u32,
    dimension: u64,
    count: u64,
    data: Vec<f32>,
}

/// Vector and metadata file locations for one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let vectors = path.into();
        let metadata = with_suffix(&vectors, ".meta");
        Self { vectors, metadata }
    }
}

/// State restored from disk
pub(crate) struct LoadedIndex {
    pub dimension: usize,
    pub vectors: Vec<f32>,
    pub metadata: Vec<LogMetadata>,
}

pub(crate) fn load(paths: &IndexPaths) -> Result<Option<LoadedIndex>> {
    let has_vectors = paths.vectors.exists();
    let has_metadata = paths.metadata.exists();

    match (has_vectors, has_metadata) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(SherlogError::CorruptIndex(format!(
                "vector file {} exists but metadata file {} is missing",
                paths.vectors.display(),
                paths.metadata.display()
            )))
        }
        (false, true) => {
            return Err(SherlogError::CorruptIndex(format!(
                "metadata file {} exists but vector file {} is missing",
                paths.metadata.display(),
                paths.vectors.display()
            )))
        }
        (true, true) => {}
    }

    let raw = read_file(&paths.vectors)?;
    let snapshot: VectorSnapshot = bincode::deserialize(&raw).map_err(|e| {
        SherlogError::CorruptIndex(format!(
            "cannot decode vector file {}: {e}",
            paths.vectors.display()
        ))
    })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SherlogError::CorruptIndex(format!(
            "unsupported vector file version {}",
            snapshot.version
        )));
    }

    let dimension = usize::try_from(snapshot.dimension)
        .map_err(|_| SherlogError::CorruptIndex("dimension out of range".to_string()))?;
    let count = usize::try_from(snapshot.count)
        .map_err(|_| SherlogError::CorruptIndex("vector count out of range".to_string()))?;

    if dimension == 0 {
        return Err(SherlogError::CorruptIndex(
            "vector file has zero row width".to_string(),
        ));
    }
    if Some(snapshot.data.len()) != dimension.checked_mul(count) {
        return Err(SherlogError::CorruptIndex(format!(
            "vector file holds {} values, expected {count} rows of width {dimension}",
            snapshot.data.len()
        )));
    }

    let raw = read_file(&paths.metadata)?;
    let metadata: Vec<LogMetadata> = serde_json::from_slice(&raw).map_err(|e| {
        SherlogError::CorruptIndex(format!(
            "cannot decode metadata file {}: {e}",
            paths.metadata.display()
        ))
    })?;

    if metadata.len() != count {
        return Err(SherlogError::CorruptIndex(format!(
            "{} metadata entries for {count} vectors",
            metadata.len()
        )));
    }

    Ok(Some(LoadedIndex {
        dimension,
        vectors: snapshot.data,
        metadata,
    }))
}

/// Replace both files through synced temporaries. The renames are ordered
/// vectors first, so an interrupted save is caught by the count check in
/// [`load`] and the finished metadata is still in `<meta>.tmp`.
pub(crate) fn write(
    paths: &IndexPaths,
    dimension: usize,
    vectors: &[f32],
    metadata: &[LogMetadata],
) -> Result<()> {
    let snapshot = VectorSnapshotRef {
        version: SNAPSHOT_VERSION,
        dimension: dimension as u64,
        count: metadata.len() as u64,
        data: vectors,
    };
    let vector_bytes =
        bincode::serialize(&snapshot).map_err(|e| SherlogError::Serialization(e.to_string()))?;
    let metadata_bytes =
        serde_json::to_vec(metadata).map_err(|e| SherlogError::Serialization(e.to_string()))?;

    ensure_parent_dir(&paths.vectors)?;

    let vectors_tmp = with_suffix(&paths.vectors, ".tmp");
    let metadata_tmp = with_suffix(&paths.metadata, ".tmp");
    write_synced(&vectors_tmp, &vector_bytes)?;
    write_synced(&metadata_tmp, &metadata_bytes)?;

    rename(&vectors_tmp, &paths.vectors)?;
    rename(&metadata_tmp, &paths.metadata)?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| io_error(path, e))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    file.write_all(bytes).map_err(|e| io_error(path, e))?;
    file.sync_all().map_err(|e| io_error(path, e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| io_error(to, e))
}

fn io_error(path: &Path, source: std::io::Error) -> SherlogError {
    SherlogError::IndexIo {
        path: path.to_path_buf(),
        source,
    }
}
