//! Progress reporting from checkpoint snapshots.
//!
//! Purely observational: reports are computed from an owned snapshot
//! and never feed back into scheduling.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::checkpoint::{CheckpointSnapshot, CheckpointStore, StatusCounts};
use crate::types::config::ProgressCadence;

/// Point-in-time view of run progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    /// Run that last wrote the checkpoint, if any
    pub run_id: Option<Uuid>,

    /// Items per status across the whole checkpoint
    pub counts: StatusCounts,

    /// Items claimable when this run started
    pub total: usize,

    /// Items that reached Succeeded or Failed during this run
    pub completed: usize,

    pub elapsed: Duration,

    /// Completed items per second
    pub throughput: f64,

    /// None until at least one item completed
    pub eta: Option<Duration>,
}

impl ProgressReport {
    /// Derive a report from a snapshot as of `now`.
    ///
    /// Without a run marker the whole checkpoint counts as the run and
    /// no rate can be computed.
    pub fn from_snapshot(snapshot: &CheckpointSnapshot, now: DateTime<Utc>) -> Self {
        let counts = snapshot.counts();

        let Some(run) = &snapshot.run else {
            return Self {
                run_id: None,
                counts,
                total: counts.total(),
                completed: counts.terminal(),
                elapsed: Duration::ZERO,
                throughput: 0.0,
                eta: None,
            };
        };

        let completed = counts.terminal().saturating_sub(run.baseline_terminal).min(run.total);
        let elapsed = (now - run.started_at).to_std().unwrap_or(Duration::ZERO);
        let seconds = elapsed.as_secs_f64();

        let throughput = if seconds > 0.0 { completed as f64 / seconds } else { 0.0 };
        let eta = (completed > 0 && throughput > 0.0)
            .then(|| Duration::from_secs_f64((run.total - completed) as f64 / throughput));

        Self {
            run_id: Some(run.run_id),
            counts,
            total: run.total,
            completed,
            elapsed,
            throughput,
            eta,
        }
    }

    /// Completed fraction of this run, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} done ({:.1}%) | succeeded {} failed {} pending {} in progress {} | {:.2} items/s",
            self.completed,
            self.total,
            self.fraction() * 100.0,
            self.counts.succeeded,
            self.counts.failed,
            self.counts.pending,
            self.counts.in_progress,
            self.throughput,
        )?;
        match self.eta {
            Some(eta) => write!(f, " | eta {}", format_duration(eta)),
            None => write!(f, " | eta unknown"),
        }
    }
}

/// `1h02m03s`, `4m05s`, `6s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

#[derive(Debug)]
struct Cadence {
    since_last: usize,
    last_emit: Instant,
}

/// Emits a status line every K completions or every T, whichever first.
#[derive(Debug)]
pub struct ProgressReporter {
    cadence: ProgressCadence,
    state: Mutex<Cadence>,
    emitted: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(cadence: ProgressCadence) -> Self {
        Self {
            cadence,
            state: Mutex::new(Cadence {
                since_last: 0,
                last_emit: Instant::now(),
            }),
            emitted: AtomicUsize::new(0),
        }
    }

    /// Time-based cadence; workers waiting on backoff wake at least
    /// this often so a status line is still due while nothing completes.
    pub fn interval(&self) -> Duration {
        self.cadence.interval()
    }

    /// Status lines emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Current progress of the run backed by `store`.
    pub fn report(&self, store: &CheckpointStore) -> ProgressReport {
        ProgressReport::from_snapshot(&store.snapshot(), Utc::now())
    }

    /// Note a processed item (or, with `completed = false`, just the
    /// passage of time); emits and returns a report when due.
    pub fn observe(&self, completed: bool, store: &CheckpointStore) -> Option<ProgressReport> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if completed {
                state.since_last += 1;
            }
            let due = state.since_last >= self.cadence.every_items
                || state.last_emit.elapsed() >= self.cadence.interval();
            if !due {
                return None;
            }
            state.since_last = 0;
            state.last_emit = Instant::now();
        }

        let report = self.report(store);
        self.emit(&report);
        Some(report)
    }

    /// Log a report unconditionally.
    pub fn emit(&self, report: &ProgressReport) {
        self.emitted.fetch_add(1, Ordering::SeqCst);
        info!(
            completed = report.completed,
            total = report.total,
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            pending = report.counts.pending,
            throughput = report.throughput,
            eta_secs = report.eta.map(|d| d.as_secs()),
            "{report}"
        );
    }
}
