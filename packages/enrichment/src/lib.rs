//! Resumable Vocabulary Enrichment Pipeline
//!
//! Turns words found in source documents into enriched learning records
//! (definition, etymology, pronunciation audio, illustration) by calling
//! a slow, rate-limited generation service. Runs can last hours, so all
//! progress lives in a checkpoint that survives crashes and restarts.
//!
//! # Guarantees
//!
//! - One work item per normalized (word, language) key
//! - Succeeded items are never reprocessed
//! - At most one record-store write per key, even across crashes
//! - A torn checkpoint write is detected, never half-loaded
//!
//! # Usage
//!
//! ```rust,ignore
//! use enrichment::{CheckpointStore, Document, Orchestrator, PipelineConfig};
//! use enrichment::{HttpEnricher, MemoryRecordStore};
//!
//! let run_id = Uuid::new_v4();
//! let checkpoint = CheckpointStore::open("words.checkpoint.jsonl", run_id, FlushPolicy::default()).await?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(HttpEnricher::new("http://localhost:8080")),
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(checkpoint),
//!     PipelineConfig::default(),
//!     run_id,
//! );
//!
//! let docs = vec![Document::from_path("lesson1.txt", "fr").await?];
//! let summary = orchestrator.run(docs, CancellationToken::new()).await?;
//! println!("{summary}");
//! ```
//!
//! # Modules
//!
//! - [`extract`] - Document decoding, normalization and tokenizing
//! - [`select`] - Cross-document deduplication
//! - [`checkpoint`] - Durable work-item store with atomic flushes
//! - [`pipeline`] - Worker, retry policy, progress and orchestrator
//! - [`traits`] - Generation service and record store seams
//! - [`services`] - HTTP generation service client and rate limiter
//! - [`stores`] - Record store implementations
//! - [`testing`] - Mock implementations for testing

pub mod checkpoint;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod select;
pub mod services;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    CheckpointError, ExtractionError, FailureKind, PipelineError, RecordStoreError, ServiceError,
    ValidationError,
};
pub use traits::{enricher::Enricher, record_store::RecordStore};
pub use types::{
    candidate::Candidate,
    config::{FlushPolicy, PipelineConfig, ProgressCadence},
    enrichment::{EnrichmentRequest, EnrichmentResult, ImageAsset, TextEnrichment},
    work::{WorkItem, WorkKey, WorkStatus},
};

pub use checkpoint::{CheckpointSnapshot, CheckpointStore, OwnerLock, RunMarker, StatusCounts};
pub use extract::{DecodedDocument, Document, DocumentFormat, EncodingChain, Extractor};
pub use pipeline::{
    EnrichmentWorker, ItemOutcome, Orchestrator, ProgressReport, ProgressReporter, RetryPolicy,
    RunPhase, RunSummary,
};
pub use select::{select, Exclusions, Selection, SelectionStats};

// Re-export services
pub use services::{EnricherExt, HttpEnricher, RateLimitedEnricher};

// Re-export stores
pub use stores::MemoryRecordStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteRecordStore;

// Re-export testing utilities
pub use testing::{MockEnricher, MockEnricherCall};
