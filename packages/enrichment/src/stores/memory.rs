//! In-memory record store for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::{RecordResult, RecordStoreError};
use crate::traits::record_store::RecordStore;
use crate::types::enrichment::EnrichmentResult;
use crate::types::work::WorkKey;

/// In-memory record store.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Can be told to fail upcoming writes to
/// exercise the worker's retry path.
pub struct MemoryRecordStore {
    records: RwLock<HashMap<WorkKey, EnrichmentResult>>,
    write_calls: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    /// Create a new empty record store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            write_calls: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Seed a record, as if written by an earlier run.
    pub fn with_record(self, key: WorkKey, result: EnrichmentResult) -> Self {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, result);
        self
    }

    /// Make the next `n` writes fail with a backend error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `write` calls received, including rejected ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<WorkKey> {
        let mut keys: Vec<WorkKey> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn exists(&self, key: &WorkKey) -> RecordResult<bool> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn write(&self, key: &WorkKey, result: &EnrichmentResult) -> RecordResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RecordStoreError::Backend("injected write failure".into()));
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(key) {
            return Err(RecordStoreError::AlreadyExists(key.to_string()));
        }
        records.insert(key.clone(), result.clone());
        Ok(())
    }

    async fn get(&self, key: &WorkKey) -> RecordResult<Option<EnrichmentResult>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}
