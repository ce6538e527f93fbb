//! Enrichment CLI
//!
//! Runs the vocabulary enrichment pipeline against a checkpoint file, a
//! SQLite record store and the HTTP generation service. Interrupt with
//! Ctrl-C; the next `enrich run` resumes where this one stopped.

mod config;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use enrichment::{
    CheckpointStore, Document, DocumentFormat, EnricherExt, HttpEnricher, Orchestrator, OwnerLock,
    PipelineConfig, ProgressReport, RateLimitedEnricher, RunSummary, SqliteRecordStore,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::Config;

#[derive(Parser)]
#[command(name = "enrich")]
#[command(about = "Resumable vocabulary enrichment")]
struct Cli {
    /// Checkpoint file (overrides ENRICH_CHECKPOINT)
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract words from documents and enrich every new one
    Run {
        #[arg(required = true)]
        docs: Vec<PathBuf>,

        /// Language tag for words without their own
        #[arg(long, default_value = "fr")]
        language: String,

        #[arg(long, value_enum, default_value_t = Format::WordList)]
        format: Format,

        /// Concurrent workers
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Give previously failed words another chance
        #[arg(long)]
        force_retry: bool,

        /// Remove a lock left behind by a killed run
        #[arg(long)]
        break_lock: bool,
    },

    /// Show checkpoint progress and failed items
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Requeue every failed item and run them
    RetryFailed {
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        #[arg(long)]
        break_lock: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    WordList,
    Prose,
}

impl From<Format> for DocumentFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::WordList => DocumentFormat::WordList,
            Format::Prose => DocumentFormat::Prose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,enrichment=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.checkpoint {
        config.checkpoint = path;
    }

    match cli.command {
        Commands::Run {
            docs,
            language,
            format,
            concurrency,
            force_retry,
            break_lock,
        } => {
            let mut documents = Vec::with_capacity(docs.len());
            for path in &docs {
                let document = Document::from_path(path, &language)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                documents.push(document.with_format(format.into()));
            }

            let pipeline = pipeline_config(&config, concurrency, force_retry);
            let run_id = Uuid::now_v7();
            let checkpoint = open_checkpoint(&config.checkpoint, run_id, &pipeline, break_lock).await?;
            execute(&config, checkpoint, pipeline, run_id, documents).await
        }
        Commands::Status { json } => status(&config, json).await,
        Commands::RetryFailed {
            concurrency,
            break_lock,
        } => {
            let pipeline = pipeline_config(&config, concurrency, false);
            let run_id = Uuid::now_v7();
            let checkpoint = open_checkpoint(&config.checkpoint, run_id, &pipeline, break_lock).await?;

            let requeued = checkpoint.requeue_failed(None, Utc::now());
            checkpoint.flush().await?;
            info!(requeued, "requeued failed items");
            if requeued == 0 && !checkpoint.has_pending() {
                println!("Nothing to retry");
                return Ok(());
            }

            execute(&config, checkpoint, pipeline, run_id, Vec::new()).await
        }
    }
}

fn pipeline_config(config: &Config, concurrency: usize, force_retry: bool) -> PipelineConfig {
    let mut pipeline = PipelineConfig::new().with_concurrency(concurrency);
    if let Some(max_attempts) = config.max_attempts {
        let retry = pipeline.retry.with_max_attempts(max_attempts);
        pipeline = pipeline.with_retry(retry);
    }
    if force_retry {
        pipeline = pipeline.force_retry();
    }
    pipeline
}

async fn open_checkpoint(
    path: &Path,
    run_id: Uuid,
    pipeline: &PipelineConfig,
    break_lock: bool,
) -> Result<CheckpointStore> {
    if break_lock && OwnerLock::break_stale(path)? {
        warn!(checkpoint = %path.display(), "broke existing checkpoint lock");
    }

    CheckpointStore::open(path, run_id, pipeline.flush)
        .await
        .with_context(|| format!("Failed to open checkpoint {}", path.display()))
}

async fn execute(
    config: &Config,
    checkpoint: CheckpointStore,
    pipeline: PipelineConfig,
    run_id: Uuid,
    documents: Vec<Document>,
) -> Result<()> {
    let enricher = build_enricher(config)?;

    let records = SqliteRecordStore::new(&config.database_url)
        .await
        .context("Failed to open record store")?;

    let orchestrator = Orchestrator::new(
        Arc::new(enricher),
        Arc::new(records),
        Arc::new(checkpoint),
        pipeline,
        run_id,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, signal).await {
            std::process::exit(130);
        }
    });

    let summary = orchestrator.run(documents, shutdown).await?;
    print_summary(&summary);
    Ok(())
}

/// Cancels `shutdown` on the first interrupt. Returns true on a second
/// interrupt, meaning the caller should abort without draining.
async fn watch_interrupts<F, Fut>(mut interrupt: F, shutdown: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    warn!("shutdown requested, finishing in-flight items (Ctrl-C again to abort)");
    shutdown.cancel();

    if interrupt().await.is_err() {
        return false;
    }
    warn!("aborting; in-flight items are recovered on the next run");
    true
}

fn build_enricher(config: &Config) -> Result<RateLimitedEnricher<HttpEnricher>> {
    let mut http = HttpEnricher::new(config.service_url()?);
    if let Some(api_key) = &config.api_key {
        http = http.with_api_key(api_key);
    }

    Ok(match config.burst {
        Some(burst) => http.rate_limited_with_burst(config.requests_per_second, burst),
        None => http.rate_limited(config.requests_per_second),
    })
}

fn print_summary(summary: &RunSummary) {
    println!("{summary}");
    for failure in &summary.documents_failed {
        println!("  skipped {}: {}", failure.document, failure.error);
    }
    if summary.interrupted {
        println!("Run again to resume the remaining {} item(s)", summary.pending_remaining);
    } else if summary.failed > 0 {
        println!("{} item(s) failed; see `enrich status` or `enrich retry-failed`", summary.failed);
    }
}

async fn status(config: &Config, json: bool) -> Result<()> {
    let checkpoint = CheckpointStore::open_read_only(&config.checkpoint)
        .await
        .with_context(|| format!("Failed to read checkpoint {}", config.checkpoint.display()))?;
    let snapshot = checkpoint.snapshot();
    let report = ProgressReport::from_snapshot(&snapshot, Utc::now());

    if json {
        let failed: Vec<_> = snapshot
            .failed()
            .map(|item| {
                json!({
                    "word": item.key.word,
                    "language": item.key.language,
                    "attempts": item.attempt_count,
                    "last_error": item.last_error,
                })
            })
            .collect();
        let output = json!({ "progress": report, "run": snapshot.run, "failed": failed });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Checkpoint: {}", config.checkpoint.display());
    if let Some(run) = &snapshot.run {
        println!("Last run:   {} (started {})", run.run_id, run.started_at.to_rfc3339());
    }
    println!("{report}");

    let failed: Vec<_> = snapshot.failed().collect();
    if !failed.is_empty() {
        println!("\nFailed items ({}):", failed.len());
        for item in failed {
            println!(
                "  {} [{} attempt(s)] {}",
                item.key,
                item.attempt_count,
                item.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    fn config_with_service() -> Config {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.service_url = Some("http://localhost:9000".to_string());
        config
    }

    #[tokio::test]
    async fn test_second_interrupt_aborts() {
        let notify = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let source = notify.clone();
        let interrupt = move || {
            let source = source.clone();
            async move {
                source.notified().await;
                Ok(())
            }
        };
        let watcher = tokio::spawn(watch_interrupts(interrupt, shutdown.clone()));

        notify.notify_one();
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());

        notify.notify_one();
        let aborted = tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(aborted);
    }

    #[tokio::test]
    async fn test_failed_signal_listener_does_not_abort() {
        let shutdown = CancellationToken::new();
        let interrupt = || async { Err(std::io::Error::other("no signal handler")) };

        assert!(!watch_interrupts(interrupt, shutdown.clone()).await);
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn test_build_enricher_with_burst() {
        let mut config = config_with_service();
        config.burst = Some(5);
        assert!(build_enricher(&config).is_ok());

        config.burst = None;
        assert!(build_enricher(&config).is_ok());
    }

    #[test]
    fn test_build_enricher_requires_service_url() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(build_enricher(&config).is_err());
    }
}
