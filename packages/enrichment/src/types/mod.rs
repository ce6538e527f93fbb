//! Domain types for the enrichment pipeline.

pub mod candidate;
pub mod config;
pub mod enrichment;
pub mod work;
