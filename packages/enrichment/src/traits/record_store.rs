//! Record store trait - where finished learning records live.

use async_trait::async_trait;

use crate::error::RecordResult;
use crate::types::enrichment::EnrichmentResult;
use crate::types::work::WorkKey;

/// Durable destination for enrichment results.
///
/// Records are immutable: a second `write` for the same key must fail
/// with [`RecordStoreError::AlreadyExists`] rather than overwrite.
///
/// [`RecordStoreError::AlreadyExists`]: crate::error::RecordStoreError::AlreadyExists
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether a record exists for `key`.
    async fn exists(&self, key: &WorkKey) -> RecordResult<bool>;

    /// Persist the record for `key`.
    async fn write(&self, key: &WorkKey, result: &EnrichmentResult) -> RecordResult<()>;

    /// Fetch a stored record.
    async fn get(&self, key: &WorkKey) -> RecordResult<Option<EnrichmentResult>>;

    /// Which of `keys` already have a record.
    async fn existing(&self, keys: &[WorkKey]) -> RecordResult<Vec<WorkKey>> {
        let mut found = Vec::new();
        for key in keys {
            if self.exists(key).await? {
                found.push(key.clone());
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn exists(&self, key: &WorkKey) -> RecordResult<bool> {
        (**self).exists(key).await
    }

    async fn write(&self, key: &WorkKey, result: &EnrichmentResult) -> RecordResult<()> {
        (**self).write(key, result).await
    }

    async fn get(&self, key: &WorkKey) -> RecordResult<Option<EnrichmentResult>> {
        (**self).get(key).await
    }

    async fn existing(&self, keys: &[WorkKey]) -> RecordResult<Vec<WorkKey>> {
        (**self).existing(keys).await
    }
}
