//! Sherlog RAG - Retrieval-augmented root-cause analysis
//!
//! This crate implements the diagnosis pipeline for a batch of logs:
//! - Redaction of sensitive substrings
//! - Retrieval of similar past logs from the vector index
//! - Prompt construction from the batch and its neighbors
//! - Generation with bounded retries and a fallback output
//! - Optional chat notification
//!
//! The pipeline never fails as a whole. Retrieval and generation problems
//! degrade the result; notification problems are only reported.

use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use sherlog_core::{LogRecord, Notifier, RagConfig, Result, SearchResult, SherlogError};
use sherlog_vector::VectorIndex;

pub mod dedup;
pub mod generation;
pub mod history;
pub mod llm;
pub mod notify;
pub mod preprocess;
pub mod prompt;
pub mod redact;
pub mod retrieval;

pub use dedup::deduplicate;
pub use generation::{
    GenerationClient, GenerationOutcome, GenerationStatus, RetryPolicy, GENERATION_FALLBACK,
};
pub use history::{DiagnosisHistory, HistoryEntry};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use notify::{format_diagnosis_message, SlackNotifier};
pub use preprocess::LogPreprocessor;
pub use prompt::{build_diagnosis_prompt, format_log_line, PromptBuilder};
pub use redact::{OutputRedactor, RedactionRule, Redactor};
pub use retrieval::{NeighborSet, Retriever};

// ============================================================================
// Pipeline State
// ============================================================================

/// Pipeline states, visited in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Retrieving,
    Prompting,
    Generating,
    Notifying,
    Done,
}

/// Delivery outcome of the optional notification step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    /// No notifier configured; the Notifying state was skipped
    Disabled,
    Sent,
    Failed { error: String },
}

/// Output of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisResult {
    /// Prompt sent to the model, with messages redacted
    pub prompt: String,

    /// Redacted model output, or the fallback text
    pub llm_output: String,

    /// Deduplicated neighbors used as context
    pub similar_logs: Vec<SearchResult>,

    pub generation: GenerationStatus,

    /// Set when retrieval failed and the prompt was built without neighbors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_error: Option<String>,

    pub notification: NotificationStatus,

    /// States visited, in order
    pub stages: Vec<PipelineStage>,

    pub processing_time_ms: u64,
}

impl DiagnosisResult {
    pub fn generation_exhausted(&self) -> bool {
        matches!(self.generation, GenerationStatus::Exhausted { .. })
    }

    /// Completed, but with missing context or fallback output
    pub fn is_degraded(&self) -> bool {
        self.generation_exhausted() || self.retrieval_error.is_some()
    }
}

// ============================================================================
// RAG Pipeline
// ============================================================================

/// Redact, retrieve, prompt, generate and notify for one batch
pub struct RagPipeline {
    index: Arc<RwLock<VectorIndex>>,
    generator: GenerationClient,
    notifier: Option<Arc<dyn Notifier>>,
    redactor: Redactor,
    output_redactor: OutputRedactor,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(index: Arc<RwLock<VectorIndex>>, generator: GenerationClient, config: RagConfig) -> Self {
        Self {
            index,
            generator,
            notifier: None,
            redactor: Redactor::default(),
            output_redactor: OutputRedactor::default(),
            config,
        }
    }

    /// Enable the Notifying state
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_output_redactor(mut self, redactor: OutputRedactor) -> Self {
        self.output_redactor = redactor;
        self
    }

    pub fn index(&self) -> &Arc<RwLock<VectorIndex>> {
        &self.index
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Insert embedded records into the shared index. Messages are redacted
    /// before anything reaches disk.
    pub fn ingest(&self, records: &[LogRecord]) -> Result<Range<usize>> {
        let redacted: Vec<LogRecord> = records
            .iter()
            .cloned()
            .map(|mut record| {
                self.redactor.redact_record(&mut record);
                record
            })
            .collect();

        let mut index = self.index.write().map_err(|_| lock_poisoned())?;
        index.insert_records(&redacted)
    }

    /// Run the pipeline on one batch. Always reaches `Done`.
    pub async fn process_batch(&self, mut batch: Vec<LogRecord>) -> DiagnosisResult {
        let start_time = Instant::now();
        let mut stages = vec![PipelineStage::Idle];

        tracing::info!(records = batch.len(), "Diagnosis started");
        for record in &mut batch {
            self.redactor.redact_record(record);
        }

        // 1. Retrieve similar past logs
        stages.push(PipelineStage::Retrieving);
        let (mut neighbors, retrieval_error) = match self.retrieve(&batch) {
            Ok(neighbors) => (neighbors.into_vec(), None),
            Err(e) => {
                tracing::warn!(error = %e, "Retrieval failed, continuing without similar logs");
                (Vec::new(), Some(e.to_string()))
            }
        };
        for neighbor in &mut neighbors {
            if let Some(message) = neighbor.metadata.message.as_mut() {
                *message = self.output_redactor.redact(message);
            }
        }
        tracing::debug!("Retrieved {} similar logs", neighbors.len());

        // 2. Build prompt
        stages.push(PipelineStage::Prompting);
        let prompt = build_diagnosis_prompt(&batch, &neighbors, &self.output_redactor);
        tracing::info!("Prompt built: {} chars", prompt.len());
        tracing::debug!(prompt = %self.output_redactor.redact(&prompt), "Generated prompt");

        // 3. Generate
        stages.push(PipelineStage::Generating);
        let outcome = self.generator.generate(&prompt).await;
        let llm_output = self.output_redactor.redact(outcome.text());
        tracing::info!(
            attempts = outcome.attempts(),
            exhausted = outcome.is_exhausted(),
            "LLM output received: {} chars",
            llm_output.len()
        );

        // 4. Notify
        let notification = match &self.notifier {
            Some(notifier) => {
                stages.push(PipelineStage::Notifying);
                let message =
                    notify::format_diagnosis_message(&batch, &llm_output, &self.output_redactor);
                match notifier.send(&message).await {
                    Ok(()) => {
                        tracing::info!(notifier = notifier.name(), "Notification sent");
                        NotificationStatus::Sent
                    }
                    Err(e) => {
                        tracing::error!(notifier = notifier.name(), error = %e, "Notification failed");
                        NotificationStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            }
            None => NotificationStatus::Disabled,
        };

        stages.push(PipelineStage::Done);
        let processing_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::info!(processing_time_ms, "Diagnosis finished");

        DiagnosisResult {
            prompt,
            llm_output,
            similar_logs: neighbors,
            generation: outcome.status(),
            retrieval_error,
            notification,
            stages,
            processing_time_ms,
        }
    }

    fn retrieve(&self, batch: &[LogRecord]) -> Result<NeighborSet> {
        let index = self.index.read().map_err(|_| lock_poisoned())?;
        let retriever = Retriever::new(&index);
        retriever.retrieve(batch, self.config.top_k)
    }
}

fn lock_poisoned() -> SherlogError {
    SherlogError::Other(anyhow::anyhow!("vector index lock poisoned"))
}

// ============================================================================
// Tests
// ============================================================================
