//! Counter Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::CounterStore,
};
use sqlx::{sqlite::SqlitePool, Row};
use std::path::PathBuf;
use tracing::debug;

/// SQLite-backed counter store
///
/// Increments are single `UPSERT` statements, so concurrent workers bumping
/// the same key never lose an update.
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    /// Create a counter store backed by its own database file
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        let store = Self { pool };
        store.initialize().await?;
        debug!(path = ?db_path, "Initialized counter store");
        Ok(store)
    }

    /// Share an existing pool, e.g. the engine database
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory counter store (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        Self::with_pool(pool).await
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO counters (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = counters.value + excluded.value,
                updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(delta)
        .bind(Self::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to increment counter: {}", e)))?;

        let value: i64 = row.get("value");
        debug!(key = key, delta = delta, value = value, "Incremented counter");
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to read counter: {}", e)))?;

        Ok(value.unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM counters WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to reset counter: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_accumulates() {
        let store = SqliteCounterStore::in_memory().await.unwrap();

        assert_eq!(store.get("dir-1").await.unwrap(), 0);
        assert_eq!(store.increment("dir-1", 2).await.unwrap(), 2);
        assert_eq!(store.increment("dir-1", 3).await.unwrap(), 5);
        assert_eq!(store.get("dir-1").await.unwrap(), 5);
        assert_eq!(store.get("dir-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SqliteCounterStore::in_memory().await.unwrap();
        store.increment("dir-1", 7).await.unwrap();
        store.reset("dir-1").await.unwrap();
        assert_eq!(store.get("dir-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = std::sync::Arc::new(SqliteCounterStore::in_memory().await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("shared", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteCounterStore::new(dir.path().join("counters.db"))
            .await
            .unwrap();
        store.increment("k", 1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), 1);
    }
}
