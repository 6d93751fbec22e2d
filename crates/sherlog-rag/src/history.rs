//! Append-only diagnosis history stored as a JSON array

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sherlog_core::{HistoryConfig, LogMetadata, LogRecord, Result, SearchResult, SherlogError};
use uuid::Uuid;

use crate::redact::{OutputRedactor, Redactor};
use crate::DiagnosisResult;

/// One completed diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,

    /// Timestamp of the first batch record, or the creation time
    pub timestamp: String,
    pub container_name: String,
    pub level: String,

    /// Redacted model output (or the fallback text)
    pub llm_output: String,

    /// True when generation fell back or similar logs were unavailable
    #[serde(default)]
    pub degraded: bool,

    pub batch_logs: Vec<LogMetadata>,
    pub similar_logs: Vec<SearchResult>,
}

impl HistoryEntry {
    pub fn from_diagnosis(batch: &[LogRecord], result: &DiagnosisResult) -> Self {
        let created_at = Utc::now();
        let first = batch.first().map(|record| &record.metadata);

        let timestamp = first
            .map(|meta| meta.timestamp.clone())
            .filter(|ts| !ts.is_empty())
            .unwrap_or_else(|| created_at.to_rfc3339());

        Self {
            id: Uuid::new_v4(),
            created_at,
            timestamp,
            container_name: first.map(|m| m.container_text().to_string()).unwrap_or_default(),
            level: first.map(|m| m.level_text().to_string()).unwrap_or_default(),
            llm_output: result.llm_output.clone(),
            degraded: result.is_degraded(),
            batch_logs: redacted_metadata(batch),
            similar_logs: result.similar_logs.clone(),
        }
    }
}

/// Batch metadata as it may be written to disk
fn redacted_metadata(batch: &[LogRecord]) -> Vec<LogMetadata> {
    let redactor = Redactor::default();
    let output_redactor = OutputRedactor::default();

    batch
        .iter()
        .map(|record| {
            let mut metadata = record.metadata.clone();
            if let Some(message) = metadata.message.as_mut() {
                *message = output_redactor.redact(&redactor.redact(message));
            }
            metadata
        })
        .collect()
}

/// History file handle
#[derive(Debug, Clone)]
pub struct DiagnosisHistory {
    path: PathBuf,
}

impl DiagnosisHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<HistoryEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(history_error(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            SherlogError::History(format!(
                "{} is not a valid history file: {e}",
                self.path.display()
            ))
        })
    }

    /// Most recent `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.load()?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Append one entry and return the new history length.
    ///
    /// An unreadable existing file fails the append and is left untouched.
    pub fn append(&self, entry: HistoryEntry) -> Result<usize> {
        let mut entries = self.load()?;
        entries.push(entry);

        let bytes = serde_json::to_vec_pretty(&entries)
            .map_err(|e| SherlogError::Serialization(e.to_string()))?;
        self.write_atomic(&bytes)?;

        tracing::info!(
            path = %self.path.display(),
            entries = entries.len(),
            "Diagnosis saved to history"
        );
        Ok(entries.len())
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| history_error(parent, e))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(|e| history_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| history_error(&tmp, e))?;
        file.sync_all().map_err(|e| history_error(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| history_error(&self.path, e))
    }
}

fn history_error(path: &Path, e: std::io::Error) -> SherlogError {
    SherlogError::History(format!("{}: {e}", path.display()))
}
