//! Checkpoint Store - durable, resumable record of every work item.
//!
//! # Example
//!
//! ```rust,ignore
//! use enrichment::checkpoint::CheckpointStore;
//!
//! let store = CheckpointStore::open("words.checkpoint.jsonl", run_id, FlushPolicy::default()).await?;
//! store.merge_pending(selection.keys, Utc::now());
//! store.flush().await?;
//! ```

pub mod lock;
pub mod snapshot;
pub mod store;

pub use lock::OwnerLock;
pub use snapshot::{CheckpointSnapshot, RunMarker, StatusCounts};
pub use store::{CheckpointStore, MergeOutcome, RecoveryOutcome, INTERRUPTED};
