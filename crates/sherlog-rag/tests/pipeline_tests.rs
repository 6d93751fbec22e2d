//! End-to-end pipeline tests with in-process LLM and notifier fakes

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use sherlog_core::{
    LlmClient, LogRecord, NotificationMessage, Notifier, RagConfig, Result, SherlogError,
};
use sherlog_rag::{
    DiagnosisHistory, GenerationClient, GenerationStatus, HistoryEntry, NotificationStatus,
    PipelineStage, RagPipeline, RetryPolicy, GENERATION_FALLBACK,
};
use sherlog_vector::VectorIndex;
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

struct ScriptedLlm {
    failures: u32,
    reply: String,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn replying(reply: &str) -> Arc<Self> {
        Self::failing_then(0, reply)
    }

    fn failing_then(failures: u32, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            failures,
            reply: reply.to_string(),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn always_failing() -> Arc<Self> {
        Self::failing_then(u32::MAX, "")
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(SherlogError::Llm("model unavailable".to_string()))
        } else {
            Ok(self.reply.clone())
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<NotificationMessage>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            Err(SherlogError::Notification("webhook returned 500".to_string()))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn seeded_index(dir: &TempDir) -> Arc<RwLock<VectorIndex>> {
    let mut index = VectorIndex::open(dir.path().join("sherlog_index.bin")).unwrap();
    index
        .insert_records(&[
            LogRecord::new("db connection pool exhausted", "2024-03-01T10:00:00Z")
                .with_container("orders")
                .with_level("ERROR")
                .with_embedding(vec![1.0, 0.0, 0.0]),
            LogRecord::new("db connection timeout", "2024-03-01T10:00:05Z")
                .with_container("orders")
                .with_level("ERROR")
                .with_embedding(vec![0.9, 0.1, 0.0]),
            LogRecord::new("cache miss storm", "2024-03-02T08:00:00Z")
                .with_container("catalog")
                .with_level("WARN")
                .with_embedding(vec![0.0, 1.0, 0.0]),
        ])
        .unwrap();
    Arc::new(RwLock::new(index))
}

fn batch() -> Vec<LogRecord> {
    vec![
        LogRecord::new("connection refused by db for ops@corp.io", "2024-06-01T12:00:00Z")
            .with_container("orders")
            .with_level("ERROR")
            .with_embedding(vec![1.0, 0.05, 0.0]),
        LogRecord::new("retrying db connect", "2024-06-01T12:00:01Z")
            .with_container("orders")
            .with_level("WARN")
            .with_embedding(vec![0.95, 0.0, 0.0]),
    ]
}

fn pipeline(index: Arc<RwLock<VectorIndex>>, llm: Arc<ScriptedLlm>, top_k: usize) -> RagPipeline {
    let generator = GenerationClient::new(llm, RetryPolicy::immediate(3));
    let config = RagConfig {
        top_k,
        ..Default::default()
    };
    RagPipeline::new(index, generator, config)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_happy_path() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::replying("Pool too small; raise max_connections.");
    let pipeline = pipeline(seeded_index(&dir), llm.clone(), 2);

    let result = pipeline.process_batch(batch()).await;

    assert_eq!(result.llm_output, "Pool too small; raise max_connections.");
    assert_eq!(result.generation, GenerationStatus::Completed { attempts: 1 });
    assert_eq!(result.notification, NotificationStatus::Disabled);
    assert!(!result.is_degraded());
    assert_eq!(
        result.stages,
        vec![
            PipelineStage::Idle,
            PipelineStage::Retrieving,
            PipelineStage::Prompting,
            PipelineStage::Generating,
            PipelineStage::Done,
        ]
    );

    // Both queries hit the same two db entries
    let similar: Vec<_> = result
        .similar_logs
        .iter()
        .map(|r| r.metadata.message_text())
        .collect();
    assert_eq!(similar, ["db connection pool exhausted", "db connection timeout"]);

    assert!(result.prompt.contains(
        "- 2024-06-01T12:00:00Z | orders | ERROR | connection refused by db for [REDACTED_EMAIL]\n"
    ));
    assert!(result
        .prompt
        .contains("- 2024-03-01T10:00:00Z | orders | ERROR | db connection pool exhausted\n"));
    assert!(!result.prompt.contains("ops@corp.io"));
    assert_eq!(llm.prompts.lock().unwrap().as_slice(), [result.prompt.clone()]);
}

#[tokio::test]
async fn test_generation_retry_recovers() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::failing_then(2, "Recovered answer");
    let pipeline = pipeline(seeded_index(&dir), llm.clone(), 2);

    let result = pipeline.process_batch(batch()).await;

    assert_eq!(result.llm_output, "Recovered answer");
    assert_eq!(result.generation, GenerationStatus::Completed { attempts: 3 });
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_generation_exhaustion_still_completes() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::always_failing();
    let pipeline = pipeline(seeded_index(&dir), llm.clone(), 2);

    let result = pipeline.process_batch(batch()).await;

    assert_eq!(result.llm_output, GENERATION_FALLBACK);
    assert!(result.generation_exhausted());
    assert!(result.is_degraded());
    assert!(!result.prompt.is_empty());
    assert!(!result.similar_logs.is_empty());
    assert_eq!(result.stages.last(), Some(&PipelineStage::Done));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_notification_failure_leaves_result_unchanged() {
    let dir = TempDir::new().unwrap();
    let index = seeded_index(&dir);

    let quiet = pipeline(index.clone(), ScriptedLlm::replying("Restart the pool."), 2);
    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let noisy = pipeline(index, ScriptedLlm::replying("Restart the pool."), 2)
        .with_notifier(notifier.clone());

    let baseline = quiet.process_batch(batch()).await;
    let result = noisy.process_batch(batch()).await;

    assert_eq!(result.prompt, baseline.prompt);
    assert_eq!(result.llm_output, baseline.llm_output);
    assert_eq!(result.similar_logs, baseline.similar_logs);
    assert_eq!(result.generation, baseline.generation);
    assert!(matches!(result.notification, NotificationStatus::Failed { .. }));
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    assert_eq!(result.stages[result.stages.len() - 2], PipelineStage::Notifying);
    assert_eq!(result.stages.last(), Some(&PipelineStage::Done));
}

#[tokio::test]
async fn test_notification_carries_redacted_output() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let llm = ScriptedLlm::replying("Rotate api_key: abc123 and mail dba@corp.io");
    let pipeline = pipeline(seeded_index(&dir), llm, 2).with_notifier(notifier.clone());

    let result = pipeline.process_batch(batch()).await;

    assert_eq!(result.notification, NotificationStatus::Sent);
    assert_eq!(
        result.llm_output,
        "Rotate api_key=[REDACTED] and mail [REDACTED_EMAIL]"
    );

    let sent = notifier.sent.lock().unwrap();
    let text = &sent[0].text;
    assert!(text.starts_with("*AI RCA & Fix Suggestion:*\n*Logs:*\n"));
    assert!(text.ends_with("\n*RCA & Fix:*\nRotate api_key=[REDACTED] and mail [REDACTED_EMAIL]"));
    assert!(!text.contains("abc123"));
    assert!(!text.contains("@corp.io"));
}

#[tokio::test]
async fn test_retrieval_failure_degrades() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::replying("Best guess without history.");
    let pipeline = pipeline(seeded_index(&dir), llm, 2);

    let wrong_width = vec![LogRecord::new("odd", "t").with_embedding(vec![1.0, 2.0])];
    let result = pipeline.process_batch(wrong_width).await;

    assert!(result.similar_logs.is_empty());
    assert!(result
        .retrieval_error
        .as_deref()
        .is_some_and(|e| e.contains("Dimension mismatch")));
    assert_eq!(result.llm_output, "Best guess without history.");
    assert_eq!(result.stages.last(), Some(&PipelineStage::Done));
}

#[tokio::test]
async fn test_empty_index_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let index = VectorIndex::open(dir.path().join("empty.bin")).unwrap();
    let pipeline = pipeline(Arc::new(RwLock::new(index)), ScriptedLlm::replying("ok"), 5);

    let result = pipeline.process_batch(batch()).await;

    assert!(result.similar_logs.is_empty());
    assert!(result.retrieval_error.is_none());
    assert!(result.prompt.contains("Similar Past Incidents:\n\nRCA and Fix Suggestion:"));
}

#[tokio::test]
async fn test_ingest_then_diagnose_and_record_history() {
    let dir = TempDir::new().unwrap();
    let index = VectorIndex::open(dir.path().join("index.bin")).unwrap();
    let pipeline = pipeline(Arc::new(RwLock::new(index)), ScriptedLlm::replying("Scale up."), 3);

    let positions = pipeline.ingest(&batch()).unwrap();
    assert_eq!(positions, 0..2);

    let records = batch();
    let result = pipeline.process_batch(records.clone()).await;

    // Each record finds itself and its sibling; identities collapse to two
    assert_eq!(result.similar_logs.len(), 2);
    assert_eq!(result.similar_logs[0].distance, 0.0);

    let history = DiagnosisHistory::new(dir.path().join("rca_history.json"));
    history
        .append(HistoryEntry::from_diagnosis(&records, &result))
        .unwrap();

    let entries = history.load().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].container_name, "orders");
    assert_eq!(entries[0].llm_output, "Scale up.");
    assert_eq!(entries[0].similar_logs, result.similar_logs);

    // Reopening the index sees the ingested records
    let reopened = VectorIndex::open(dir.path().join("index.bin")).unwrap();
    assert_eq!(reopened.len(), 2);
}

#[tokio::test]
async fn test_ingest_never_persists_sensitive_text() {
    let dir = TempDir::new().unwrap();
    let index = VectorIndex::open(dir.path().join("index.bin")).unwrap();
    let pipeline = pipeline(Arc::new(RwLock::new(index)), ScriptedLlm::replying("Rotate."), 1);

    let record = LogRecord::new(
        "login a@b.com card 4111111111111111 token=sekrit",
        "2024-06-02T09:00:00Z",
    )
    .with_container("auth")
    .with_level("ERROR")
    .with_embedding(vec![0.0, 0.0, 1.0]);
    pipeline.ingest(&[record.clone()]).unwrap();

    let stored = std::fs::read_to_string(dir.path().join("index.bin.meta")).unwrap();
    assert!(!stored.contains("a@b.com"));
    assert!(!stored.contains("4111111111111111"));
    assert!(stored.contains("[REDACTED_EMAIL]"));
    assert!(stored.contains("[REDACTED_CARD]"));

    // Neighbors come back through the output stage as well
    let result = pipeline.process_batch(vec![record.clone()]).await;
    assert_eq!(result.similar_logs.len(), 1);
    assert_eq!(
        result.similar_logs[0].metadata.message_text(),
        "login [REDACTED_EMAIL] card [REDACTED_CARD] token=[REDACTED]"
    );
    assert!(!result.prompt.contains("sekrit"));

    let history = DiagnosisHistory::new(dir.path().join("rca_history.json"));
    history
        .append(HistoryEntry::from_diagnosis(&[record], &result))
        .unwrap();
    let saved = std::fs::read_to_string(history.path()).unwrap();
    assert!(!saved.contains("sekrit"));
    assert!(!saved.contains("a@b.com"));
}
