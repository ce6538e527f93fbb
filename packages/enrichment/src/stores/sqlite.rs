//! SQLite record store.
//!
//! A file-based backend using SQLite. Good for:
//! - Local runs of the CLI
//! - Testing with persistent data

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::error::{RecordResult, RecordStoreError};
use crate::traits::record_store::RecordStore;
use crate::types::enrichment::EnrichmentResult;
use crate::types::work::WorkKey;

fn backend(e: impl std::error::Error + Send + Sync + 'static) -> RecordStoreError {
    RecordStoreError::Backend(Box::new(e))
}

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Create a store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://enrichments.db?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> RecordResult<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// Uses a single connection; every connection to `:memory:` is a
    /// separate database.
    pub async fn in_memory() -> RecordResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> RecordResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> RecordResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichments (
                word TEXT NOT NULL,
                language TEXT NOT NULL,
                definition TEXT NOT NULL,
                etymology TEXT NOT NULL,
                audio_ref TEXT NOT NULL,
                image_ref TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                PRIMARY KEY (word, language)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct EnrichmentRow {
    definition: String,
    etymology: String,
    audio_ref: String,
    image_ref: String,
    generated_at: String,
}

impl EnrichmentRow {
    fn into_result(self) -> RecordResult<EnrichmentResult> {
        let generated_at = chrono::DateTime::parse_from_rfc3339(&self.generated_at)
            .map_err(backend)?
            .with_timezone(&chrono::Utc);

        Ok(EnrichmentResult {
            definition: self.definition,
            etymology: self.etymology,
            audio_ref: self.audio_ref,
            image_ref: self.image_ref,
            generated_at,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn exists(&self, key: &WorkKey) -> RecordResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM enrichments WHERE word = ? AND language = ?")
            .bind(&key.word)
            .bind(&key.language)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(found.is_some())
    }

    async fn write(&self, key: &WorkKey, result: &EnrichmentResult) -> RecordResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO enrichments
                (word, language, definition, etymology, audio_ref, image_ref, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.word)
        .bind(&key.language)
        .bind(&result.definition)
        .bind(&result.etymology)
        .bind(&result.audio_ref)
        .bind(&result.image_ref)
        .bind(result.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if inserted == 0 {
            return Err(RecordStoreError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    async fn get(&self, key: &WorkKey) -> RecordResult<Option<EnrichmentResult>> {
        let row = sqlx::query_as::<_, EnrichmentRow>(
            "SELECT definition, etymology, audio_ref, image_ref, generated_at FROM enrichments WHERE word = ? AND language = ?",
        )
        .bind(&key.word)
        .bind(&key.language)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(EnrichmentRow::into_result).transpose()
    }
}
