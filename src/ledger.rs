use crate::error::LedgerError;
use crate::models::{Importance, ProcessedRecord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Durable record of threads whose classification must not be repeated.
#[async_trait]
pub trait ThreadLedger: Send + Sync {
    async fn is_processed(&self, thread_id: &str) -> Result<bool, LedgerError>;

    /// Inserting an id that is already present is a no-op.
    async fn mark_processed(
        &self,
        thread_id: &str,
        importance: Option<Importance>,
    ) -> Result<(), LedgerError>;

    /// Administrative reset. Returns the number of records removed.
    async fn clear_all(&self) -> Result<u64, LedgerError>;
}

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub async fn new(database_url: &str) -> Result<Self, LedgerError> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory ledger, used by tests.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let ledger = Self { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) FROM processed_threads")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    /// Most recent records first, optionally filtered by a thread id substring.
    pub async fn records(
        &self,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProcessedRecord>, LedgerError> {
        let pattern = format!("%{}%", search.unwrap_or(""));
        let records = sqlx::query_as::<_, ProcessedRecord>(
            "SELECT thread_id, importance, processed_at
             FROM processed_threads
             WHERE thread_id LIKE ?
             ORDER BY processed_at DESC, thread_id ASC
             LIMIT ?",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Claims the single run lock row. A row older than `ttl` is treated as
    /// left behind by a crashed run and replaced.
    pub async fn try_acquire_run_lock(&self, holder: &str, ttl: Duration) -> Result<bool, LedgerError> {
        sqlx::query("DELETE FROM run_lock WHERE acquired_at < datetime('now', ?)")
            .bind(format!("-{} seconds", ttl.as_secs()))
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("INSERT OR IGNORE INTO run_lock (id, holder) VALUES (1, ?)")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_run_lock(&self, holder: &str) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM run_lock WHERE holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ThreadLedger for SqliteLedger {
    async fn is_processed(&self, thread_id: &str) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM processed_threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(
        &self,
        thread_id: &str,
        importance: Option<Importance>,
    ) -> Result<(), LedgerError> {
        sqlx::query("INSERT OR IGNORE INTO processed_threads (thread_id, importance) VALUES (?, ?)")
            .bind(thread_id)
            .bind(importance.map(|i| i.as_str()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM processed_threads")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
