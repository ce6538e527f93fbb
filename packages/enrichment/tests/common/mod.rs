#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use enrichment::{
    CheckpointStore, Document, FlushPolicy, MemoryRecordStore, MockEnricher, Orchestrator,
    PipelineConfig, RetryPolicy, RunSummary, WorkItem, WorkKey,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Retry quickly so multi-attempt scenarios finish in milliseconds.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_retry(RetryPolicy::new(5, Duration::from_millis(5), Duration::from_millis(40)))
        .with_flush(FlushPolicy::new(1, Duration::from_secs(30)))
}

pub fn word_list(id: &str, words: &[&str]) -> Document {
    let body: String = words.iter().map(|w| format!("{w}\n")).collect();
    Document::new(id, body, "fr")
}

pub fn key(word: &str) -> WorkKey {
    WorkKey::parse(word, "fr").unwrap()
}

/// A checkpoint directory plus shared collaborators that outlive
/// individual runs, the way a real record store outlives a process.
pub struct Harness {
    pub dir: TempDir,
    pub enricher: Arc<MockEnricher>,
    pub records: Arc<MemoryRecordStore>,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new(enricher: MockEnricher) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            enricher: Arc::new(enricher),
            records: Arc::new(MemoryRecordStore::new()),
            config: fast_config(),
        }
    }

    pub fn with_records(mut self, records: MemoryRecordStore) -> Self {
        self.records = Arc::new(records);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("words.checkpoint.jsonl")
    }

    pub async fn orchestrator(&self) -> Orchestrator<MockEnricher, MemoryRecordStore> {
        let run_id = Uuid::new_v4();
        let checkpoint = CheckpointStore::open(self.checkpoint_path(), run_id, self.config.flush)
            .await
            .unwrap();
        Orchestrator::new(
            self.enricher.clone(),
            self.records.clone(),
            Arc::new(checkpoint),
            self.config.clone(),
            run_id,
        )
    }

    /// One complete run; the owner lock is released on return.
    pub async fn run(&self, documents: Vec<Document>) -> RunSummary {
        self.orchestrator()
            .await
            .run(documents, CancellationToken::new())
            .await
            .unwrap()
    }

    /// Reload the checkpoint from disk.
    pub async fn reload(&self) -> CheckpointStore {
        CheckpointStore::open_read_only(self.checkpoint_path()).await.unwrap()
    }

    pub async fn item(&self, word: &str) -> WorkItem {
        self.reload().await.get(&key(word)).unwrap()
    }
}
