//! Typed errors for the enrichment pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Each component owns
//! its error family; `PipelineError` is what a run surfaces.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::work::WorkStatus;

/// Errors raised to the run level.
///
/// Per-item failures never appear here; they are recorded on the
/// work item and the run continues.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Checkpoint could not be opened, validated, or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Record store failed while building the exclusion set
    #[error("record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    /// Reading a source document from disk failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source document could not be decoded by any encoding in the chain.
#[derive(Debug, Error)]
#[error("could not decode document {document} (tried {})", .tried.join(", "))]
pub struct ExtractionError {
    /// Identifier of the document (usually its path)
    pub document: String,

    /// Encodings attempted, in order
    pub tried: Vec<String>,
}

/// A candidate that cannot become a work item.
///
/// Skipped silently by the selector, never counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left after normalization
    #[error("empty candidate")]
    Empty,

    /// Only digits, punctuation or symbols
    #[error("candidate has no letters: {0:?}")]
    NoLetters(String),

    /// Longer than any plausible vocabulary entry
    #[error("candidate too long ({0} chars)")]
    TooLong(usize),

    /// Language tag missing or malformed
    #[error("invalid language tag: {0:?}")]
    InvalidLanguage(String),
}

/// How the worker should treat a failed external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, rate limit, network reset - retry with backoff
    Transient,
    /// Permanently rejected - never retry
    Fatal,
}

impl FailureKind {
    /// Whether this failure kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// Errors returned by the external generation service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Call exceeded its bounded timeout
    #[error("{call} call timed out after {elapsed:?}")]
    Timeout { call: &'static str, elapsed: Duration },

    /// Service asked us to slow down
    #[error("rate limited by service")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection refused/reset, DNS failure and similar
    #[error("network error: {0}")]
    Network(String),

    /// 5xx or 408 from the service
    #[error("service unavailable (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Response body could not be decoded
    #[error("malformed service response: {0}")]
    MalformedResponse(String),

    /// Service rejected the word itself
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other permanent 4xx
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ServiceError {
    /// Classify the error for retry purposes.
    pub fn kind(&self) -> FailureKind {
        match self {
            ServiceError::Timeout { .. }
            | ServiceError::RateLimited { .. }
            | ServiceError::Network(_)
            | ServiceError::Server { .. }
            | ServiceError::MalformedResponse(_) => FailureKind::Transient,
            ServiceError::InvalidInput(_) | ServiceError::Rejected { .. } => FailureKind::Fatal,
        }
    }

    /// Server-provided minimum wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Snapshot exists but fails integrity checks; needs manual intervention
    #[error("checkpoint {path} is corrupt at line {line}: {reason}")]
    Corruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Another run holds the owner lock
    #[error("checkpoint {path} is locked by run {run_id} (pid {pid}) since {acquired_at}")]
    Locked {
        path: PathBuf,
        run_id: String,
        pid: u32,
        acquired_at: String,
    },

    /// Status change that would break monotonicity
    #[error("invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: WorkStatus,
        to: WorkStatus,
    },

    /// Write attempted through a store opened without the owner lock
    #[error("checkpoint {0} was opened read-only")]
    ReadOnly(PathBuf),

    /// Upsert of an item that was never merged
    #[error("unknown work item: {0}")]
    UnknownItem(String),

    /// Filesystem failure
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a record failed
    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the external record store.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// A result for this key was already written
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure
    #[error("record store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type alias for run-level operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for external service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Result type alias for record store operations.
pub type RecordResult<T> = std::result::Result<T, RecordStoreError>;
