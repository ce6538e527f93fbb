//! Orchestrator - wires extraction, selection, checkpointing and
//! workers into one run.
//!
//! ```text
//! Loading ──► Merging ──► Running ──► Draining ──► Summarizing ──► Done
//!                            │            ▲
//!                            └─shutdown───┘
//! ```
//!
//! Shutdown is cooperative: it stops new claims and cuts backoff
//! waits short, but an item already handed to a worker always reaches
//! Succeeded, Pending or Failed before the final flush.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, RunMarker};
use crate::error::{CheckpointError, Result};
use crate::extract::{Document, EncodingChain, Extractor};
use crate::pipeline::progress::{format_duration, ProgressReport, ProgressReporter};
use crate::pipeline::worker::EnrichmentWorker;
use crate::select::{self, Exclusions, SelectionStats};
use crate::traits::enricher::Enricher;
use crate::traits::record_store::RecordStore;
use crate::types::candidate::Candidate;
use crate::types::config::PipelineConfig;
use crate::types::work::{WorkKey, WorkStatus};

/// Phase of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Constructed, `run` not called yet
    Idle,
    Loading,
    Merging,
    Running,
    Draining,
    Summarizing,
    Done,
}

/// A document the extractor could not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub document: String,
    pub error: String,
}

/// Final accounting of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    /// Checkpoint-wide counts at the end of the run
    pub succeeded: usize,
    pub failed: usize,
    pub pending_remaining: usize,

    /// Attempts made during this run
    pub processed: usize,

    /// Items that reached a terminal state during this run
    pub completed: usize,

    /// Items left InProgress by a previous run
    pub recovered: usize,

    /// Failed items requeued by force-retry
    pub force_retried: usize,

    /// New work items created from this run's documents
    pub merged: usize,

    pub documents_failed: Vec<DocumentFailure>,
    pub selection: SelectionStats,

    /// Whether the run stopped on a shutdown signal
    pub interrupted: bool,

    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} {} in {}: succeeded {}, failed {}, pending {} ({} processed this run)",
            self.run_id,
            if self.interrupted { "interrupted" } else { "finished" },
            format_duration(self.elapsed),
            self.succeeded,
            self.failed,
            self.pending_remaining,
            self.processed,
        )?;
        if !self.documents_failed.is_empty() {
            write!(f, ", {} document(s) undecodable", self.documents_failed.len())?;
        }
        Ok(())
    }
}

/// Drives one run over a set of documents.
pub struct Orchestrator<E, R> {
    enricher: Arc<E>,
    records: Arc<R>,
    checkpoint: Arc<CheckpointStore>,
    config: PipelineConfig,
    extractor: Extractor,
    reporter: ProgressReporter,
    run_id: Uuid,
    phase: RwLock<RunPhase>,
}

impl<E: Enricher, R: RecordStore> Orchestrator<E, R> {
    /// Create an orchestrator. `run_id` should be the id the
    /// checkpoint's owner lock was taken with.
    pub fn new(
        enricher: Arc<E>,
        records: Arc<R>,
        checkpoint: Arc<CheckpointStore>,
        config: PipelineConfig,
        run_id: Uuid,
    ) -> Self {
        let extractor = Extractor::new(EncodingChain::from_labels(&config.encodings));
        let reporter = ProgressReporter::new(config.progress);

        Self {
            enricher,
            records,
            checkpoint,
            config,
            extractor,
            reporter,
            run_id,
            phase: RwLock::new(RunPhase::Idle),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: RunPhase) {
        let mut current = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if *current != phase {
            debug!(run_id = %self.run_id, from = ?*current, to = ?phase, "run phase");
            *current = phase;
        }
    }

    /// Live progress of the run.
    pub fn status(&self) -> ProgressReport {
        self.reporter.report(&self.checkpoint)
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Execute a full run: fresh or resumed, depending on the checkpoint.
    ///
    /// Items already Pending in the checkpoint are processed whether or
    /// not they appear in `documents`. Per-item failures never fail the
    /// run; only checkpoint and record-store errors do.
    pub async fn run(&self, documents: Vec<Document>, shutdown: CancellationToken) -> Result<RunSummary> {
        if !self.checkpoint.is_owned() {
            return Err(CheckpointError::ReadOnly(self.checkpoint.path().to_path_buf()).into());
        }

        let started = Instant::now();
        let started_at = Utc::now();
        info!(run_id = %self.run_id, documents = documents.len(), "starting run");

        // Loading
        self.set_phase(RunPhase::Loading);
        let (candidates, documents_failed) = self.extract(&documents);
        let distinct = select::distinct_keys(&candidates);
        let enriched = self.records.existing(&distinct).await?;
        let exclusions = Exclusions::new()
            .with_enriched(enriched)
            .with_succeeded(self.checkpoint.keys_with_status(WorkStatus::Succeeded))
            .with_failed(self.checkpoint.keys_with_status(WorkStatus::Failed))
            .with_force_retry(self.config.force_retry);
        let selection = select::select(candidates, &exclusions);
        info!(
            selected = selection.len(),
            seen = selection.stats.seen,
            duplicates = selection.stats.duplicates,
            already_enriched = selection.stats.already_enriched,
            already_succeeded = selection.stats.already_succeeded,
            "selection complete"
        );

        // Merging
        self.set_phase(RunPhase::Merging);
        let now = Utc::now();
        let recovered = self.checkpoint.recover_interrupted(self.config.retry.max_attempts, now);
        let force_retried = if self.config.force_retry {
            let keys: HashSet<WorkKey> = selection.keys.iter().cloned().collect();
            self.checkpoint.requeue_failed(Some(&keys), now)
        } else {
            0
        };
        let merged = self.checkpoint.merge_pending(selection.keys, now);

        let counts = self.checkpoint.counts();
        self.checkpoint.set_run_marker(RunMarker {
            run_id: self.run_id,
            started_at,
            total: counts.pending,
            baseline_terminal: counts.terminal(),
        });
        self.checkpoint.flush().await?;
        info!(
            pending = counts.pending,
            inserted = merged.inserted,
            recovered = recovered.requeued + recovered.failed,
            force_retried,
            "checkpoint merged"
        );

        // Running
        self.set_phase(RunPhase::Running);
        let processed = AtomicUsize::new(0);
        let worker = EnrichmentWorker::new(
            self.enricher.clone(),
            self.records.clone(),
            self.checkpoint.clone(),
            &self.config,
        );
        let loops = (0..self.config.concurrency).map(|id| self.worker_loop(id, &worker, &shutdown, &processed));
        let outcomes = join_all(loops).await;

        // Draining
        self.set_phase(RunPhase::Draining);
        let flushed = self.checkpoint.flush().await;
        if let Some(e) = outcomes.into_iter().find_map(|r| r.err()) {
            error!(run_id = %self.run_id, error = %e, "run aborted");
            return Err(e);
        }
        flushed?;

        // Summarizing
        self.set_phase(RunPhase::Summarizing);
        let report = self.status();
        let summary = RunSummary {
            run_id: self.run_id,
            succeeded: report.counts.succeeded,
            failed: report.counts.failed,
            pending_remaining: report.counts.pending + report.counts.in_progress,
            processed: processed.load(Ordering::SeqCst),
            completed: report.completed,
            recovered: recovered.requeued + recovered.failed,
            force_retried,
            merged: merged.inserted,
            documents_failed,
            selection: selection.stats,
            interrupted: shutdown.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            run_id = %self.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            pending = summary.pending_remaining,
            processed = summary.processed,
            "{summary}"
        );

        self.set_phase(RunPhase::Done);
        Ok(summary)
    }

    fn extract(&self, documents: &[Document]) -> (Vec<Candidate>, Vec<DocumentFailure>) {
        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for document in documents {
            match self.extractor.decode(document) {
                Ok(decoded) => candidates.extend(decoded.candidates()),
                Err(e) => {
                    warn!(document = %document.id, error = %e, "skipping undecodable document");
                    failures.push(DocumentFailure {
                        document: document.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        (candidates, failures)
    }

    async fn worker_loop(
        &self,
        id: usize,
        worker: &EnrichmentWorker<E, R>,
        shutdown: &CancellationToken,
        processed: &AtomicUsize,
    ) -> Result<()> {
        debug!(worker = id, "worker loop starting");

        loop {
            if shutdown.is_cancelled() {
                self.set_phase(RunPhase::Draining);
                break;
            }

            let Some(item) = self.checkpoint.claim_next(Utc::now()) else {
                match self.checkpoint.next_retry_at() {
                    Some(at) => {
                        wait_until(at, self.reporter.interval(), shutdown).await;
                        self.reporter.observe(false, &self.checkpoint);
                        continue;
                    }
                    None => break,
                }
            };

            debug!(worker = id, key = %item.key, attempt = item.attempt_count, "claimed item");
            let outcome = worker.process(item).await?;
            processed.fetch_add(1, Ordering::SeqCst);

            self.checkpoint.flush_if_due().await?;
            self.reporter.observe(outcome.is_terminal(), &self.checkpoint);
        }

        debug!(worker = id, "worker loop stopped");
        Ok(())
    }
}

/// Shortest backoff wait, so a zero progress interval cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(50);

/// Sleep until `at`, for at most `cap`, or until shutdown.
async fn wait_until(at: DateTime<Utc>, cap: Duration, shutdown: &CancellationToken) {
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    if wait.is_zero() {
        return;
    }
    let wait = wait.min(cap.max(MIN_WAIT));
    debug!(wait_ms = wait.as_millis() as u64, "waiting for backoff");
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(wait) => {}
    }
}
