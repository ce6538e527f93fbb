//! Enrichment worker - drives one claimed item to an outcome.
//!
//! ```text
//! claimed item
//!     │
//!     ├─► record already stored?  ──yes──► Succeeded (adopted)
//!     ├─► text call    (timeout)
//!     ├─► image call   (timeout)
//!     ├─► record store write (AlreadyExists counts as written)
//!     └─► Succeeded │ Pending + retry_at │ Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{CheckpointResult, FailureKind, RecordStoreError, ServiceError};
use crate::pipeline::retry::RetryPolicy;
use crate::traits::enricher::Enricher;
use crate::traits::record_store::RecordStore;
use crate::types::config::PipelineConfig;
use crate::types::enrichment::{EnrichmentRequest, EnrichmentResult};
use crate::types::work::{WorkItem, WorkKey};

/// What happened to an item after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Record written, or already present from an earlier run (`adopted`)
    Succeeded { adopted: bool },

    /// Transient failure, eligible again at `retry_at`
    Requeued { retry_at: DateTime<Utc>, error: String },

    /// Fatal failure or attempts exhausted
    Failed { error: String },
}

impl ItemOutcome {
    /// Succeeded or Failed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemOutcome::Requeued { .. })
    }
}

/// A classified failure from any step of an attempt.
#[derive(Debug)]
struct Failure {
    kind: FailureKind,
    message: String,
    retry_after: Option<Duration>,
}

impl From<ServiceError> for Failure {
    fn from(e: ServiceError) -> Self {
        Self {
            kind: e.kind(),
            retry_after: e.retry_after(),
            message: e.to_string(),
        }
    }
}

impl From<RecordStoreError> for Failure {
    fn from(e: RecordStoreError) -> Self {
        Self {
            kind: FailureKind::Transient,
            retry_after: None,
            message: e.to_string(),
        }
    }
}

/// Processes claimed work items against the service and record store.
pub struct EnrichmentWorker<E, R> {
    enricher: Arc<E>,
    records: Arc<R>,
    checkpoint: Arc<CheckpointStore>,
    retry: RetryPolicy,
    text_timeout: Duration,
    image_timeout: Duration,
}

impl<E: Enricher, R: RecordStore> EnrichmentWorker<E, R> {
    pub fn new(
        enricher: Arc<E>,
        records: Arc<R>,
        checkpoint: Arc<CheckpointStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            enricher,
            records,
            checkpoint,
            retry: config.retry,
            text_timeout: config.text_timeout(),
            image_timeout: config.image_timeout(),
        }
    }

    /// Run one attempt for an item already claimed (InProgress) and
    /// record the outcome in the checkpoint.
    ///
    /// Per-item failures are part of the outcome; only a checkpoint
    /// error is returned as `Err`.
    pub async fn process(&self, mut item: WorkItem) -> CheckpointResult<ItemOutcome> {
        let started = std::time::Instant::now();

        let outcome = match self.attempt(&item.key).await {
            Ok(adopted) => {
                item.succeed(Utc::now());
                debug!(
                    key = %item.key,
                    attempt = item.attempt_count,
                    adopted,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "item succeeded"
                );
                ItemOutcome::Succeeded { adopted }
            }
            Err(failure) => self.settle_failure(&mut item, failure),
        };

        self.checkpoint.upsert(item)?;
        Ok(outcome)
    }

    /// Returns whether an existing record was adopted.
    async fn attempt(&self, key: &WorkKey) -> Result<bool, Failure> {
        if self.records.exists(key).await? {
            return Ok(true);
        }

        let request = EnrichmentRequest::from(key);

        let text = tokio::time::timeout(self.text_timeout, self.enricher.enrich_text(&request))
            .await
            .map_err(|_| ServiceError::Timeout {
                call: "text",
                elapsed: self.text_timeout,
            })??;

        let image = tokio::time::timeout(self.image_timeout, self.enricher.generate_image(&request, &text))
            .await
            .map_err(|_| ServiceError::Timeout {
                call: "image",
                elapsed: self.image_timeout,
            })??;

        let result = EnrichmentResult::new(text, image, Utc::now());
        match self.records.write(key, &result).await {
            Ok(()) => Ok(false),
            Err(RecordStoreError::AlreadyExists(_)) => {
                warn!(key = %key, "record appeared during attempt, keeping existing");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn settle_failure(&self, item: &mut WorkItem, failure: Failure) -> ItemOutcome {
        let now = Utc::now();

        if failure.kind.should_retry() && !self.retry.is_exhausted(item.attempt_count) {
            let delay = self.retry.delay_with(item.attempt_count, failure.retry_after);
            let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
            warn!(
                key = %item.key,
                attempt = item.attempt_count,
                max_attempts = self.retry.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %failure.message,
                "transient failure, requeued"
            );
            item.requeue(failure.message.clone(), retry_at, now);
            ItemOutcome::Requeued {
                retry_at,
                error: failure.message,
            }
        } else {
            error!(
                key = %item.key,
                attempt = item.attempt_count,
                fatal = !failure.kind.should_retry(),
                error = %failure.message,
                "item failed"
            );
            item.fail(failure.message.clone(), now);
            ItemOutcome::Failed {
                error: failure.message,
            }
        }
    }
}
