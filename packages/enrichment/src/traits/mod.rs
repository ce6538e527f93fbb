//! Core trait abstractions for the enrichment pipeline.
//!
//! These traits define the two external collaborators a run depends
//! on: the generation service and the record store.

pub mod enricher;
pub mod record_store;
