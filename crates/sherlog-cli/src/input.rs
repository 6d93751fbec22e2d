//! Reading log records from disk

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use sherlog_core::LogRecord;

/// Read a JSON array of log records
pub fn read_records(path: &Path) -> anyhow::Result<Vec<LogRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read logs from {}", path.display()))?;

    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    if !value.is_array() {
        bail!("{} must contain a JSON array of log records", path.display());
    }

    serde_json::from_value(value)
        .with_context(|| format!("{} contains malformed log records", path.display()))
}
