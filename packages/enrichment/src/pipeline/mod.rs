//! Enrichment pipeline - retry policy, worker, progress and orchestration.
//!
//! The pipeline runs:
//! - Selection of new work from decoded documents
//! - Crash recovery and merge into the checkpoint
//! - Worker loops claiming items and calling the service
//! - Periodic flushes and progress lines
//! - A final flush and summary

pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod worker;

pub use orchestrator::{DocumentFailure, Orchestrator, RunPhase, RunSummary};
pub use progress::{format_duration, ProgressReport, ProgressReporter};
pub use retry::RetryPolicy;
pub use worker::{EnrichmentWorker, ItemOutcome};
