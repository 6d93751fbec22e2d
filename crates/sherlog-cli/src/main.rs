//! Sherlog CLI - Command-line interface
//!
//! Usage:
//!   sherlog ingest <logs.json>
//!   sherlog diagnose <logs.json> [--batch-size N] [--slack] [--skip-ingest] [--json]
//!   sherlog search <text> [-k N]
//!   sherlog stats
//!   sherlog history [--limit N]

mod input;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sherlog_core::{AppConfig, LogRecord, LoggingConfig, Notifier};
use sherlog_rag::{
    create_llm_client, DiagnosisHistory, DiagnosisResult, GenerationClient, HistoryEntry,
    LogPreprocessor, NotificationStatus, OutputRedactor, RagPipeline, RetryPolicy, SlackNotifier,
};
use sherlog_vector::{RecordEmbedder, VectorIndex};

#[derive(Parser)]
#[command(name = "sherlog")]
#[command(about = "Log root-cause analysis with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed logs and add them to the index
    Ingest {
        /// JSON array of log records
        path: PathBuf,
    },
    /// Diagnose a batch of logs against past incidents
    Diagnose {
        /// JSON array of log records
        path: PathBuf,

        /// Records sent to the model (defaults to rag.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Post the diagnosis to Slack
        #[arg(long)]
        slack: bool,

        /// Do not add the logs to the index first
        #[arg(long)]
        skip_ingest: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find indexed logs similar to a text
    Search {
        text: String,

        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Show index statistics
    Stats,
    /// Show recent diagnoses
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Ingest { path } => {
            let records = prepare_records(&config, &path).await?;
            let mut index = VectorIndex::from_config(&config.index)?;
            let positions = index.insert_records(&records)?;
            println!(
                "Ingested {} logs into {} ({} total)",
                positions.len(),
                index.path().display(),
                index.len()
            );
        }
        Commands::Diagnose {
            path,
            batch_size,
            slack,
            skip_ingest,
            json,
        } => {
            diagnose(&config, &path, batch_size, slack, skip_ingest, json).await?;
        }
        Commands::Search { text, k } => {
            let embedder = RecordEmbedder::from_config(&config.embedding, &config.llm)?;
            let query = embedder.embed_text(&text).await?;
            let index = VectorIndex::from_config(&config.index)?;
            let results = index.search(&query, k)?;
            let redactor = OutputRedactor::default();

            if results.is_empty() {
                println!("No similar logs found");
            }
            for result in results {
                println!(
                    "[{:.4}] {} | {} | {} | {}",
                    result.distance,
                    result.metadata.timestamp,
                    result.metadata.container_text(),
                    result.metadata.level_text(),
                    redactor.redact(result.metadata.message_text())
                );
            }
        }
        Commands::Stats => {
            let index = VectorIndex::from_config(&config.index)?;
            println!("{}", serde_json::to_string_pretty(&index.stats())?);
        }
        Commands::History { limit } => {
            let history = DiagnosisHistory::from_config(&config.history);
            let entries = history.recent(limit)?;
            if entries.is_empty() {
                println!("No diagnoses recorded in {}", history.path().display());
            }
            for entry in entries {
                let marker = if entry.degraded { " (degraded)" } else { "" };
                println!(
                    "{} | {} | {} | {}{}",
                    entry.created_at.to_rfc3339(),
                    entry.timestamp,
                    entry.container_name,
                    entry.level,
                    marker
                );
                println!("{}\n", entry.llm_output);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read, clean and embed records
async fn prepare_records(config: &AppConfig, path: &Path) -> anyhow::Result<Vec<LogRecord>> {
    let records = input::read_records(path)?;
    tracing::info!("Loaded {} logs from {}", records.len(), path.display());

    let cleaned = LogPreprocessor::default().preprocess(records);

    let embedder = RecordEmbedder::from_config(&config.embedding, &config.llm)?;
    let embedded = embedder
        .embed_records(cleaned)
        .await
        .context("failed to embed logs")?;

    if let Some(cache) = embedder.cache() {
        let stats = cache.stats().report();
        tracing::debug!(hits = stats.hits, misses = stats.misses, "Embedding cache");
    }
    Ok(embedded)
}

async fn diagnose(
    config: &AppConfig,
    path: &Path,
    batch_size: Option<usize>,
    slack: bool,
    skip_ingest: bool,
    json: bool,
) -> anyhow::Result<()> {
    let records = prepare_records(config, path).await?;

    let index = Arc::new(RwLock::new(VectorIndex::from_config(&config.index)?));
    let generator = GenerationClient::new(
        create_llm_client(&config.llm)?,
        RetryPolicy::from_config(&config.llm),
    );
    let mut pipeline = RagPipeline::new(index, generator, config.rag.clone());

    if slack || config.notification.enabled {
        let notifier: Arc<dyn Notifier> = Arc::new(SlackNotifier::from_config(&config.notification)?);
        pipeline = pipeline.with_notifier(notifier);
    }

    if !skip_ingest {
        let positions = pipeline.ingest(&records)?;
        tracing::info!("Added {} logs to the index", positions.len());
    }

    let batch_size = batch_size.unwrap_or(config.rag.batch_size);
    let batch: Vec<LogRecord> = records.into_iter().take(batch_size).collect();
    if batch.is_empty() {
        anyhow::bail!("no logs to diagnose in {}", path.display());
    }

    let result = pipeline.process_batch(batch.clone()).await;

    let history = DiagnosisHistory::from_config(&config.history);
    if let Err(e) = history.append(HistoryEntry::from_diagnosis(&batch, &result)) {
        tracing::error!(error = %e, "Failed to save diagnosis history");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_diagnosis(&result);
    }
    Ok(())
}

fn print_diagnosis(result: &DiagnosisResult) {
    println!("=== RCA & Fix Suggestion ===");
    println!("{}", result.llm_output);

    if let Some(error) = &result.retrieval_error {
        println!("\n(similar logs unavailable: {error})");
    }

    println!("\n=== Similar Logs ({}) ===", result.similar_logs.len());
    for log in &result.similar_logs {
        println!(
            "- {} | {} | {} | {}",
            log.metadata.timestamp,
            log.metadata.container_text(),
            log.metadata.level_text(),
            log.metadata.message_text()
        );
    }

    match &result.notification {
        NotificationStatus::Disabled => {}
        NotificationStatus::Sent => println!("\nSent to Slack"),
        NotificationStatus::Failed { error } => println!("\nSlack notification failed: {error}"),
    }
}
