//! Pattern-based scrubbing of sensitive substrings
//!
//! Two independent stages:
//! - `Redactor` runs on record messages before they are indexed or stored
//! - `OutputRedactor` runs on rendered prompts and model output before they
//!   are logged, displayed or sent anywhere
//!
//! Rules apply in list order. Every built-in replacement is itself inert
//! under every rule, so redacting twice changes nothing.

use regex::{NoExpand, Regex};
use sherlog_core::{LogRecord, Result, SherlogError};

/// Placeholder for email-like substrings
pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";

/// Placeholder for card-number-like digit runs
pub const REDACTED_CARD: &str = "[REDACTED_CARD]";

const RECORD_RULES: &[(&str, &str)] = &[
    (r"[\w\.-]+@[\w\.-]+", REDACTED_EMAIL),
    (r"\b(?:\d[ -]*?){13,16}\b", REDACTED_CARD),
];

const OUTPUT_RULES: &[(&str, &str)] = &[
    (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+", REDACTED_EMAIL),
    (r"(?i)api[_-]?key\s*[:=]\s*\w+", "api_key=[REDACTED]"),
    (r"(?i)token\s*[:=]\s*\w+", "token=[REDACTED]"),
];

/// A single (pattern, replacement) rule; the replacement is literal
#[derive(Debug, Clone)]
pub struct RedactionRule {
    pattern: Regex,
    replacement: String,
}

impl RedactionRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SherlogError::Validation(format!("invalid redaction pattern: {e}")))?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, NoExpand(&self.replacement))
            .into_owned()
    }
}

fn builtin(rules: &[(&str, &str)]) -> Vec<RedactionRule> {
    rules
        .iter()
        .filter_map(|(pattern, replacement)| RedactionRule::new(pattern, *replacement).ok())
        .collect()
}

/// Record-stage redactor applied to log messages
#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<RedactionRule>,
}

impl Redactor {
    /// Redactor with a custom ordered rule list
    pub fn new(rules: Vec<RedactionRule>) -> Self {
        Self { rules }
    }

    /// Build from (pattern, replacement) pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let rules = pairs
            .iter()
            .map(|(pattern, replacement)| RedactionRule::new(pattern, *replacement))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[RedactionRule] {
        &self.rules
    }

    /// Apply every rule in order
    pub fn redact(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
    }

    /// Redact a record's message in place; an absent message becomes empty text
    pub fn redact_record(&self, record: &mut LogRecord) {
        let message = record.metadata.message.take().unwrap_or_default();
        record.metadata.message = Some(self.redact(&message));
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(builtin(RECORD_RULES))
    }
}

/// Output-stage redactor for prompts and generated text
#[derive(Debug, Clone)]
pub struct OutputRedactor {
    inner: Redactor,
}

impl OutputRedactor {
    pub fn new(rules: Vec<RedactionRule>) -> Self {
        Self {
            inner: Redactor::new(rules),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        self.inner.redact(text)
    }
}

impl Default for OutputRedactor {
    fn default() -> Self {
        Self::new(builtin(OUTPUT_RULES))
    }
}
