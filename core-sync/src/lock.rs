//! Named advisory locks backed by a SQLite table.
//!
//! A lock is held as an explicit [`LockLease`] with an expiry. The holder
//! renews it while alive; a lease left behind by a crashed process lapses and
//! can be taken over by the next instance.

use bridge_traits::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Lock arbitrating which instance watches libraries
pub const LIBRARY_WATCH_LOCK: &str = "library-watch";

/// Hands out leases on named locks for one process.
pub struct LockManager {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    owner: String,
}

/// A held lock. Release it explicitly; dropping it leaves the row to expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    pub owner: String,
    pub expires_at: i64,
}

impl LockManager {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Identity written into every lease this manager takes
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS advisory_locks (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(())
    }

    /// Take the lock if it is free, expired, or already ours.
    ///
    /// # Returns
    /// `Ok(None)` when another live owner holds it
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let now = self.clock.unix_timestamp_millis();
        let expires_at = now + ttl.as_millis() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO advisory_locks (name, owner, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE advisory_locks.expires_at <= ? OR advisory_locks.owner = excluded.owner
            "#,
        )
        .bind(name)
        .bind(&self.owner)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            debug!(lock = name, "Lock held by another instance");
            return Ok(None);
        }

        info!(lock = name, owner = %self.owner, "Acquired lock");
        Ok(Some(LockLease {
            name: name.to_string(),
            owner: self.owner.clone(),
            expires_at,
        }))
    }

    /// Push the expiry of a held lease forward.
    ///
    /// # Errors
    /// `LockUnavailable` if the lease lapsed and someone else took the lock
    pub async fn renew(&self, lease: &mut LockLease, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.unix_timestamp_millis() + ttl.as_millis() as i64;

        let result = sqlx::query(
            "UPDATE advisory_locks SET expires_at = ? WHERE name = ? AND owner = ?",
        )
        .bind(expires_at)
        .bind(&lease.name)
        .bind(&lease.owner)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::LockUnavailable(lease.name.clone()));
        }

        lease.expires_at = expires_at;
        Ok(())
    }

    pub async fn release(&self, lease: LockLease) -> Result<()> {
        sqlx::query("DELETE FROM advisory_locks WHERE name = ? AND owner = ?")
            .bind(&lease.name)
            .bind(&lease.owner)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        info!(lock = %lease.name, "Released lock");
        Ok(())
    }
}
