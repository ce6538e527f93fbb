//! Single-owner lock on a checkpoint file.
//!
//! A sibling `<checkpoint>.lock` file is created with `create_new`, so
//! two runs cannot both own the same checkpoint. The file records who
//! holds it and is removed when the lock is dropped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CheckpointError, CheckpointResult};

#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    run_id: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held for the lifetime of a writable checkpoint store.
#[derive(Debug)]
pub struct OwnerLock {
    path: PathBuf,
}

impl OwnerLock {
    /// Path of the lock file guarding `checkpoint`.
    pub fn lock_path(checkpoint: &Path) -> PathBuf {
        let mut name = checkpoint.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take ownership of `checkpoint` for `run_id`.
    ///
    /// Fails with [`CheckpointError::Locked`] if another run holds it.
    pub fn acquire(checkpoint: &Path, run_id: Uuid) -> CheckpointResult<Self> {
        let path = Self::lock_path(checkpoint);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let owner = LockOwner {
                    run_id: run_id.to_string(),
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                serde_json::to_writer(&mut file, &owner)?;
                file.write_all(b"\n")?;
                file.sync_all()?;
                debug!(lock = %path.display(), %run_id, "acquired checkpoint lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Self::locked_error(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lock left behind by a run that died without releasing it.
    ///
    /// Returns whether a lock file was present.
    pub fn break_stale(checkpoint: &Path) -> CheckpointResult<bool> {
        let path = Self::lock_path(checkpoint);
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(lock = %path.display(), "removed existing checkpoint lock");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locked_error(path: PathBuf) -> CheckpointError {
        let owner = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LockOwner>(raw.trim()).ok());

        match owner {
            Some(owner) => CheckpointError::Locked {
                path,
                run_id: owner.run_id,
                pid: owner.pid,
                acquired_at: owner.acquired_at.to_rfc3339(),
            },
            None => CheckpointError::Locked {
                path,
                run_id: "unknown".to_string(),
                pid: 0,
                acquired_at: "unknown".to_string(),
            },
        }
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to release checkpoint lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_owner_is_rejected() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("words.jsonl");

        let first_run = Uuid::new_v4();
        let _held = OwnerLock::acquire(&checkpoint, first_run).unwrap();

        match OwnerLock::acquire(&checkpoint, Uuid::new_v4()) {
            Err(CheckpointError::Locked { run_id, pid, .. }) => {
                assert_eq!(run_id, first_run.to_string());
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("words.jsonl");

        let lock = OwnerLock::acquire(&checkpoint, Uuid::new_v4()).unwrap();
        assert!(lock.path().exists());
        drop(lock);

        assert!(!OwnerLock::lock_path(&checkpoint).exists());
        OwnerLock::acquire(&checkpoint, Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_break_stale() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("words.jsonl");
        fs::write(OwnerLock::lock_path(&checkpoint), "garbage").unwrap();

        assert!(matches!(
            OwnerLock::acquire(&checkpoint, Uuid::new_v4()),
            Err(CheckpointError::Locked { pid: 0, .. })
        ));
        assert!(OwnerLock::break_stale(&checkpoint).unwrap());
        assert!(!OwnerLock::break_stale(&checkpoint).unwrap());
        OwnerLock::acquire(&checkpoint, Uuid::new_v4()).unwrap();
    }
}
