//! Configuration types for a pipeline run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::retry::RetryPolicy;

/// Configuration for the enrichment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempt limit and backoff schedule for transient failures.
    pub retry: RetryPolicy,

    /// Bound on the text-enrichment call (definition + etymology).
    ///
    /// Default: 60 seconds.
    pub text_timeout_ms: u64,

    /// Bound on the image-generation call.
    ///
    /// Default: 120 seconds.
    pub image_timeout_ms: u64,

    /// When the checkpoint is flushed during Running.
    pub flush: FlushPolicy,

    /// How often a progress line is emitted.
    pub progress: ProgressCadence,

    /// Number of concurrent worker loops (1 = strictly sequential).
    pub concurrency: usize,

    /// Re-run items that previously ended Failed.
    pub force_retry: bool,

    /// Fallback chain of encodings tried after UTF-8 (WHATWG labels).
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

fn default_encodings() -> Vec<String> {
    vec![
        "windows-1252".to_string(),
        "iso-8859-15".to_string(),
        "iso-8859-2".to_string(),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            text_timeout_ms: 60_000,
            image_timeout_ms: 120_000,
            flush: FlushPolicy::default(),
            progress: ProgressCadence::default(),
            concurrency: 1,
            force_retry: false,
            encodings: default_encodings(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set both call timeouts.
    pub fn with_timeouts(mut self, text: Duration, image: Duration) -> Self {
        self.text_timeout_ms = text.as_millis() as u64;
        self.image_timeout_ms = image.as_millis() as u64;
        self
    }

    /// Set the flush cadence.
    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    /// Set the progress cadence.
    pub fn with_progress(mut self, progress: ProgressCadence) -> Self {
        self.progress = progress;
        self
    }

    /// Set worker concurrency (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Re-run terminally failed items.
    pub fn force_retry(mut self) -> Self {
        self.force_retry = true;
        self
    }

    /// Replace the legacy encoding chain.
    pub fn with_encodings(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.encodings = labels.into_iter().map(|l| l.into()).collect();
        self
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_millis(self.text_timeout_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }
}

/// Flush the checkpoint every N mutations or every T, whichever first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Default: 10 processed items.
    pub every_items: usize,

    /// Default: 30 seconds.
    pub every_ms: u64,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            every_items: 10,
            every_ms: 30_000,
        }
    }
}

impl FlushPolicy {
    pub fn new(every_items: usize, every: Duration) -> Self {
        Self {
            every_items: every_items.max(1),
            every_ms: every.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.every_ms)
    }
}

/// Emit a status line every K completions or every T, whichever first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressCadence {
    /// Default: 25 completed items.
    pub every_items: usize,

    /// Default: 60 seconds.
    pub every_ms: u64,
}

impl Default for ProgressCadence {
    fn default() -> Self {
        Self {
            every_items: 25,
            every_ms: 60_000,
        }
    }
}

impl ProgressCadence {
    pub fn new(every_items: usize, every: Duration) -> Self {
        Self {
            every_items: every_items.max(1),
            every_ms: every.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.every_ms)
    }
}
