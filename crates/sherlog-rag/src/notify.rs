//! Slack incoming-webhook notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sherlog_core::{
    LogRecord, NotificationConfig, NotificationMessage, Notifier, Result, SherlogError,
};

use crate::prompt::format_log_line;
use crate::redact::OutputRedactor;

/// Posts messages to a Slack incoming webhook
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SherlogError::Notification(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    /// Create from config; the webhook URL is required
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let url = config
            .slack_webhook_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SherlogError::Config("Slack webhook URL required".to_string()))?;

        Self::new(url, Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await
            .map_err(|e| SherlogError::Notification(format!("Slack request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SherlogError::Notification(format!(
                "Slack returned {status}: {body}"
            )));
        }

        tracing::debug!("Slack notification delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

/// Format a diagnosis for chat. `output` is expected to be redacted already.
pub fn format_diagnosis_message(
    batch: &[LogRecord],
    output: &str,
    redactor: &OutputRedactor,
) -> NotificationMessage {
    let lines: Vec<String> = batch
        .iter()
        .map(|record| format_log_line(&record.metadata, redactor))
        .collect();

    let text = format!(
        "*AI RCA & Fix Suggestion:*\n*Logs:*\n{}\n*RCA & Fix:*\n{}",
        lines.join("\n"),
        output
    );

    NotificationMessage::text(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_diagnosis_message() {
        let batch = vec![
            LogRecord::new("OOMKilled", "t1")
                .with_container("worker")
                .with_level("ERROR"),
            LogRecord::new("restart by admin@corp.io", "t2"),
        ];

        let message = format_diagnosis_message(&batch, "Raise memory limit.", &OutputRedactor::default());

        assert_eq!(
            message.text,
            "*AI RCA & Fix Suggestion:*\n*Logs:*\n\
             - t1 | worker | ERROR | OOMKilled\n\
             - t2 |  |  | restart by [REDACTED_EMAIL]\n\
             *RCA & Fix:*\nRaise memory limit."
        );
        assert!(message.blocks.is_none());
    }

    #[test]
    fn test_logs_and_fix_sections_are_adjacent() {
        let batch = vec![LogRecord::new("disk full", "t1")];

        let message = format_diagnosis_message(&batch, "Free space.", &OutputRedactor::default());

        assert!(!message.text.contains("\n\n"));
        assert!(message.text.ends_with("- t1 |  |  | disk full\n*RCA & Fix:*\nFree space."));
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = NotificationConfig {
            enabled: true,
            slack_webhook_url: None,
            ..Default::default()
        };
        assert!(matches!(
            SlackNotifier::from_config(&config),
            Err(SherlogError::Config(_))
        ));

        let config = NotificationConfig {
            slack_webhook_url: Some(String::new()),
            ..config
        };
        assert!(SlackNotifier::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = NotificationConfig {
            enabled: true,
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            timeout_secs: 5,
        };
        let notifier = SlackNotifier::from_config(&config).unwrap();
        assert_eq!(notifier.name(), "slack");
        assert_eq!(notifier.webhook_url, "https://hooks.slack.com/services/T/B/X");
    }
}
