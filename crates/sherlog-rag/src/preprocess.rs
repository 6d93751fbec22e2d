//! Record cleaning: redaction followed by deduplication

use sherlog_core::LogRecord;
use tracing::{debug, info};

use crate::dedup::deduplicate;
use crate::redact::Redactor;

/// Redacts then deduplicates raw records
#[derive(Debug, Clone, Default)]
pub struct LogPreprocessor {
    redactor: Redactor,
}

impl LogPreprocessor {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Redaction runs first so records that differ only in a redacted
    /// substring collapse into one.
    pub fn preprocess(&self, records: Vec<LogRecord>) -> Vec<LogRecord> {
        let received = records.len();

        let redacted = records.into_iter().map(|mut record| {
            self.redactor.redact_record(&mut record);
            record
        });
        let cleaned = deduplicate(redacted);

        info!(
            received,
            kept = cleaned.len(),
            dropped = received - cleaned.len(),
            "Preprocessed log records"
        );
        debug!("Redaction rules applied: {}", self.redactor.rules().len());

        cleaned
    }
}
