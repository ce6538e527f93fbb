use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::OwnerLock;
use super::snapshot::{self, CheckpointSnapshot, RunMarker, StatusCounts};
use crate::error::{CheckpointError, CheckpointResult};
use crate::types::config::FlushPolicy;
use crate::types::work::{WorkItem, WorkKey, WorkStatus};

/// Recorded on items found InProgress when a checkpoint is reopened.
pub const INTERRUPTED: &str = "interrupted before completion";

/// Outcome of [`CheckpointStore::merge_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub existing: usize,
}

/// Outcome of [`CheckpointStore::recover_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub requeued: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct State {
    items: IndexMap<WorkKey, WorkItem>,
    run: Option<RunMarker>,

    /// Total mutations applied since open
    mutations: u64,

    /// Value of `mutations` captured by the last successful flush
    flushed: u64,

    /// Items settled out of InProgress since open
    processed: u64,

    /// Value of `processed` captured by the last successful flush
    processed_flushed: u64,

    last_flush: Instant,
}

impl State {
    fn touch(&mut self) {
        self.mutations += 1;
    }

    fn dirty(&self) -> u64 {
        self.mutations - self.flushed
    }

    fn processed_since_flush(&self) -> u64 {
        self.processed - self.processed_flushed
    }
}

/// Durable map of work items, in first-sighting order.
///
/// All mutation goes through this store. The in-memory state sits
/// behind a std mutex that is never held across an `.await`; flushes
/// encode under the mutex and write outside it.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<State>,
    flush_gate: tokio::sync::Mutex<()>,
    policy: FlushPolicy,
    lock: Option<OwnerLock>,
}

impl CheckpointStore {
    /// Open `path` for a run, taking the owner lock.
    ///
    /// A missing file yields an empty store. A file that fails
    /// integrity checks is a [`CheckpointError::Corruption`].
    pub async fn open(path: impl AsRef<Path>, run_id: Uuid, policy: FlushPolicy) -> CheckpointResult<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = OwnerLock::acquire(&path, run_id)?;

        remove_stale_temp(&path).await?;
        let mut store = Self::load(path, policy).await?;
        store.lock = Some(lock);
        Ok(store)
    }

    /// Open without the owner lock. For status queries; never flush
    /// a store opened this way while a run is active.
    pub async fn open_read_only(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        Self::load(path.as_ref().to_path_buf(), FlushPolicy::default()).await
    }

    async fn load(path: PathBuf, policy: FlushPolicy) -> CheckpointResult<Self> {
        let (items, run) = match tokio::fs::read(&path).await {
            Ok(bytes) => snapshot::decode(&path, &bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(checkpoint = %path.display(), "no checkpoint found, starting empty");
                (Vec::new(), None)
            }
            Err(e) => return Err(e.into()),
        };

        let items: IndexMap<WorkKey, WorkItem> = items.into_iter().map(|i| (i.key.clone(), i)).collect();
        debug!(checkpoint = %path.display(), items = items.len(), "loaded checkpoint");

        Ok(Self {
            path,
            state: Mutex::new(State {
                items,
                run,
                mutations: 0,
                flushed: 0,
                processed: 0,
                processed_flushed: 0,
                last_flush: Instant::now(),
            }),
            flush_gate: tokio::sync::Mutex::new(()),
            policy,
            lock: None,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this store holds the owner lock.
    pub fn is_owned(&self) -> bool {
        self.lock.is_some()
    }

    pub fn get(&self, key: &WorkKey) -> Option<WorkItem> {
        self.state().items.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Replace an existing item, enforcing the monotonic lifecycle.
    pub fn upsert(&self, item: WorkItem) -> CheckpointResult<()> {
        let mut state = self.state();
        let current = state
            .items
            .get(&item.key)
            .ok_or_else(|| CheckpointError::UnknownItem(item.key.to_string()))?;

        if !current.status.can_transition_to(item.status) {
            return Err(CheckpointError::InvalidTransition {
                key: item.key.to_string(),
                from: current.status,
                to: item.status,
            });
        }

        let settled = current.status == WorkStatus::InProgress;

        state.items.insert(item.key.clone(), item);
        if settled {
            state.processed += 1;
        }
        state.touch();
        Ok(())
    }

    /// Atomically claim the first claimable item in insertion order.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Option<WorkItem> {
        let mut state = self.state();
        let item = state.items.values_mut().find(|i| i.is_claimable(now))?;
        item.claim(now);
        let claimed = item.clone();
        state.touch();
        Some(claimed)
    }

    /// Insert new keys as Pending; existing items are left untouched.
    pub fn merge_pending(&self, keys: impl IntoIterator<Item = WorkKey>, now: DateTime<Utc>) -> MergeOutcome {
        let mut state = self.state();
        let mut outcome = MergeOutcome::default();

        for key in keys {
            if state.items.contains_key(&key) {
                outcome.existing += 1;
            } else {
                state.items.insert(key.clone(), WorkItem::new(key, now));
                outcome.inserted += 1;
            }
        }

        if outcome.inserted > 0 {
            state.touch();
        }
        outcome
    }

    /// Operator force-retry: Failed -> Pending with attempts reset.
    ///
    /// `only` limits the requeue to the given keys; `None` requeues
    /// every failed item. `last_error` is kept for audit.
    pub fn requeue_failed(&self, only: Option<&HashSet<WorkKey>>, now: DateTime<Utc>) -> usize {
        let mut state = self.state();
        let mut requeued = 0;

        for item in state.items.values_mut() {
            let selected = only.map_or(true, |keys| keys.contains(&item.key));
            if item.status == WorkStatus::Failed && selected {
                item.status = WorkStatus::Pending;
                item.attempt_count = 0;
                item.retry_at = None;
                item.updated_at = now;
                requeued += 1;
            }
        }

        if requeued > 0 {
            state.touch();
            info!(requeued, "requeued failed items");
        }
        requeued
    }

    /// Treat items left InProgress by a previous run as transient failures.
    pub fn recover_interrupted(&self, max_attempts: u32, now: DateTime<Utc>) -> RecoveryOutcome {
        let mut state = self.state();
        let mut outcome = RecoveryOutcome::default();

        for item in state.items.values_mut() {
            if item.status != WorkStatus::InProgress {
                continue;
            }
            if item.attempt_count >= max_attempts {
                item.fail(INTERRUPTED, now);
                outcome.failed += 1;
            } else {
                item.requeue(INTERRUPTED, now, now);
                outcome.requeued += 1;
            }
        }

        if outcome.requeued + outcome.failed > 0 {
            state.touch();
            warn!(
                requeued = outcome.requeued,
                failed = outcome.failed,
                "recovered items interrupted by a previous run"
            );
        }
        outcome
    }

    /// Earliest `retry_at` among Pending items still waiting on backoff.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.state()
            .items
            .values()
            .filter(|i| i.status == WorkStatus::Pending)
            .filter_map(|i| i.retry_at)
            .min()
    }

    /// Whether any item is Pending, claimable now or later.
    pub fn has_pending(&self) -> bool {
        self.state().items.values().any(|i| i.status == WorkStatus::Pending)
    }

    pub fn keys_with_status(&self, status: WorkStatus) -> Vec<WorkKey> {
        self.state()
            .items
            .values()
            .filter(|i| i.status == status)
            .map(|i| i.key.clone())
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(self.state().items.values())
    }

    pub fn set_run_marker(&self, marker: RunMarker) {
        let mut state = self.state();
        state.run = Some(marker);
        state.touch();
    }

    pub fn run_marker(&self) -> Option<RunMarker> {
        self.state().run.clone()
    }

    /// Owned point-in-time copy; safe to inspect while workers run.
    pub fn snapshot(&self) -> CheckpointSnapshot {
        let state = self.state();
        CheckpointSnapshot {
            items: state.items.values().cloned().collect(),
            run: state.run.clone(),
            taken_at: Utc::now(),
        }
    }

    /// Persist the current state atomically.
    ///
    /// Writes a sibling temp file, fsyncs it, renames it over the
    /// checkpoint and fsyncs the directory. A crash at any point
    /// leaves either the old or the new snapshot intact.
    pub async fn flush(&self) -> CheckpointResult<()> {
        if self.lock.is_none() {
            return Err(CheckpointError::ReadOnly(self.path.clone()));
        }
        let _gate = self.flush_gate.lock().await;

        let (bytes, captured, processed, count) = {
            let state = self.state();
            let items: Vec<WorkItem> = state.items.values().cloned().collect();
            let bytes = snapshot::encode(&items, state.run.as_ref(), Utc::now())?;
            (bytes, state.mutations, state.processed, items.len())
        };

        write_atomically(&self.path, &bytes).await?;

        let mut state = self.state();
        state.flushed = state.flushed.max(captured);
        state.processed_flushed = state.processed_flushed.max(processed);
        state.last_flush = Instant::now();
        debug!(checkpoint = %self.path.display(), items = count, bytes = bytes.len(), "flushed checkpoint");
        Ok(())
    }

    /// Flush once the policy's count of processed items or its interval
    /// has been reached, provided anything changed.
    ///
    /// Returns whether a flush happened.
    pub async fn flush_if_due(&self) -> CheckpointResult<bool> {
        let due = {
            let state = self.state();
            let dirty = state.dirty();
            dirty > 0
                && (state.processed_since_flush() >= self.policy.every_items as u64
                    || state.last_flush.elapsed() >= self.policy.interval())
        };

        if due {
            self.flush().await?;
        }
        Ok(due)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn remove_stale_temp(path: &Path) -> CheckpointResult<()> {
    let tmp = temp_path(path);
    match tokio::fs::remove_file(&tmp).await {
        Ok(()) => {
            warn!(temp = %tmp.display(), "discarded temp file from an interrupted flush");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    sync_parent_dir(path).await
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
