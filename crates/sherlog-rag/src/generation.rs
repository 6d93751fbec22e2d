//! Retrying generation with a terminal fallback
//!
//! `GenerationClient` never returns an error: after the last failed attempt
//! it yields `GenerationOutcome::Exhausted`, whose text is the fixed
//! `GENERATION_FALLBACK` sentinel.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sherlog_core::{LlmClient, LlmConfig};
use tracing::{error, info, warn};

/// Output text used when every attempt failed
pub const GENERATION_FALLBACK: &str = "LLM processing failed.";

/// Attempt budget and backoff between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,

    /// Delay after the first failure
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Retry immediately, without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay after failed attempt number `attempt` (1-based): the initial
    /// backoff doubled per prior failure, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Result of a generation call
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The backend answered; text is returned verbatim
    Generated { text: String, attempts: u32 },

    /// Every attempt failed
    Exhausted { attempts: u32, last_error: String },
}

impl GenerationOutcome {
    /// Generated text, or the fallback sentinel
    pub fn text(&self) -> &str {
        match self {
            Self::Generated { text, .. } => text,
            Self::Exhausted { .. } => GENERATION_FALLBACK,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Generated { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Status without the generated text
    pub fn status(&self) -> GenerationStatus {
        match self {
            Self::Generated { attempts, .. } => GenerationStatus::Completed {
                attempts: *attempts,
            },
            Self::Exhausted {
                attempts,
                last_error,
            } => GenerationStatus::Exhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
        }
    }
}

/// Serializable generation status reported in diagnosis results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    Completed { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

/// LLM client wrapped in a bounded retry loop
#[derive(Clone)]
pub struct GenerationClient {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Generate with the configured attempt budget
    pub async fn generate(&self, prompt: &str) -> GenerationOutcome {
        self.generate_with_attempts(prompt, self.policy.max_attempts)
            .await
    }

    /// Generate with an explicit attempt budget (clamped to at least 1)
    pub async fn generate_with_attempts(&self, prompt: &str, max_attempts: u32) -> GenerationOutcome {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.client.generate(prompt).await {
                Ok(text) => {
                    if attempt > 1 {
                        info!(attempt, "LLM call succeeded after retry");
                    }
                    return GenerationOutcome::Generated {
                        text,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    error!(
                        attempt,
                        max_attempts,
                        model = self.client.model(),
                        error = %e,
                        "LLM call failed"
                    );
                    last_error = e.to_string();

                    if attempt < max_attempts {
                        let delay = self.policy.backoff_for(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        warn!(max_attempts, "All LLM attempts failed, using fallback output");
        GenerationOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }
}
