//! Diagnosis prompt rendering
//!
//! The prompt is plain text and fully determined by its inputs, so it can be
//! compared byte for byte in tests.

use sherlog_core::{LogMetadata, LogRecord, SearchResult};

use crate::redact::OutputRedactor;

/// Instruction placed before the evidence
pub const DIAGNOSIS_PREAMBLE: &str = "Given the following logs and similar past incidents, \
summarize the root cause and suggest a fix.";

/// Instruction placed after the evidence
pub const DIAGNOSIS_CLOSING: &str = "RCA and Fix Suggestion:";

pub const CURRENT_LOGS_TITLE: &str = "Current Logs";
pub const SIMILAR_INCIDENTS_TITLE: &str = "Similar Past Incidents";

/// Render one log as `- timestamp | container | level | message`.
///
/// Absent fields render as empty text; the message is redacted.
pub fn format_log_line(metadata: &LogMetadata, redactor: &OutputRedactor) -> String {
    format!(
        "- {} | {} | {} | {}",
        metadata.timestamp,
        metadata.container_text(),
        metadata.level_text(),
        redactor.redact(metadata.message_text())
    )
}

/// Builder for sectioned plain-text prompts
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    preamble: String,
    sections: Vec<(String, Vec<String>)>,
    closing: String,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the opening instruction
    pub fn preamble(mut self, text: impl Into<String>) -> Self {
        self.preamble = text.into();
        self
    }

    /// Add a titled section; an empty section still renders its title
    pub fn section<I, S>(mut self, title: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections
            .push((title.into(), lines.into_iter().map(Into::into).collect()));
        self
    }

    /// Set the closing instruction
    pub fn closing(mut self, text: impl Into<String>) -> Self {
        self.closing = text.into();
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        if !self.preamble.is_empty() {
            prompt.push_str(&self.preamble);
            prompt.push_str("\n\n");
        }

        for (title, lines) in &self.sections {
            prompt.push_str(title);
            prompt.push_str(":\n");
            for line in lines {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str(&self.closing);
        prompt
    }
}

/// Render the diagnosis prompt for a batch and its retrieved neighbors
pub fn build_diagnosis_prompt(
    batch: &[LogRecord],
    neighbors: &[SearchResult],
    redactor: &OutputRedactor,
) -> String {
    PromptBuilder::new()
        .preamble(DIAGNOSIS_PREAMBLE)
        .section(
            CURRENT_LOGS_TITLE,
            batch
                .iter()
                .map(|record| format_log_line(&record.metadata, redactor)),
        )
        .section(
            SIMILAR_INCIDENTS_TITLE,
            neighbors
                .iter()
                .map(|neighbor| format_log_line(&neighbor.metadata, redactor)),
        )
        .closing(DIAGNOSIS_CLOSING)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(message: &str, timestamp: &str) -> SearchResult {
        SearchResult {
            metadata: LogRecord::new(message, timestamp)
                .with_container("db")
                .with_level("WARN")
                .metadata,
            distance: 0.5,
            position: 0,
        }
    }

    #[test]
    fn test_exact_prompt() {
        let batch = vec![LogRecord::new("conn refused", "2024-05-01T10:00:00Z")
            .with_container("api")
            .with_level("ERROR")];
        let neighbors = vec![neighbor("pool exhausted", "2024-04-01T09:00:00Z")];

        let prompt = build_diagnosis_prompt(&batch, &neighbors, &OutputRedactor::default());

        assert_eq!(
            prompt,
            "Given the following logs and similar past incidents, summarize the root cause and suggest a fix.\n\
             \n\
             Current Logs:\n\
             - 2024-05-01T10:00:00Z | api | ERROR | conn refused\n\
             \n\
             Similar Past Incidents:\n\
             - 2024-04-01T09:00:00Z | db | WARN | pool exhausted\n\
             \n\
             RCA and Fix Suggestion:"
        );
    }

    #[test]
    fn test_missing_fields_render_empty() {
        let mut record = LogRecord::new("", "");
        record.metadata.message = None;

        let line = format_log_line(&record.metadata, &OutputRedactor::default());

        assert_eq!(line, "-  |  |  | ");
    }

    #[test]
    fn test_messages_are_redacted() {
        let batch = vec![LogRecord::new("auth failed for ops@corp.io token=abc", "t")];

        let prompt = build_diagnosis_prompt(&batch, &[], &OutputRedactor::default());

        assert!(prompt.contains("- t |  |  | auth failed for [REDACTED_EMAIL] token=[REDACTED]\n"));
        assert!(!prompt.contains("ops@corp.io"));
    }

    #[test]
    fn test_empty_inputs_keep_structure() {
        let prompt = build_diagnosis_prompt(&[], &[], &OutputRedactor::default());

        assert_eq!(
            prompt,
            format!(
                "{DIAGNOSIS_PREAMBLE}\n\nCurrent Logs:\n\nSimilar Past Incidents:\n\n{DIAGNOSIS_CLOSING}"
            )
        );
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let batch = vec![LogRecord::new("a", "1"), LogRecord::new("b", "2")];
        let neighbors = vec![neighbor("c", "3"), neighbor("d", "4")];
        let redactor = OutputRedactor::default();

        assert_eq!(
            build_diagnosis_prompt(&batch, &neighbors, &redactor),
            build_diagnosis_prompt(&batch, &neighbors, &redactor)
        );
    }

    #[test]
    fn test_builder_without_preamble() {
        let prompt = PromptBuilder::new()
            .section("Notes", ["one", "two"])
            .closing("Done:")
            .build();

        assert_eq!(prompt, "Notes:\none\ntwo\n\nDone:");
    }
}
