//! # Durable Job Queue
//!
//! SQLite-backed queue that is the system of record for in-flight work.
//!
//! ## Overview
//!
//! Handlers never keep state between steps; everything they need next is
//! written here as a job row. A crash loses nothing: rows claimed by a dead
//! process are put back to `waiting` by [`JobQueue::requeue_stalled`] on the
//! next start.
//!
//! ## Features
//!
//! - **Atomic claim**: `dequeue` flips one waiting row to active in a single
//!   statement, so concurrent workers never run the same job
//! - **Batch enqueue**: `queue_all` writes every job in one transaction
//! - **Retry Logic**: a handler error puts the job back to `waiting` until
//!   `max_attempts` is reached, then marks it failed
//! - **Pause/Resume**: persisted per queue in `queue_state`
//! - **Retention**: completed and failed rows are kept for inspection until
//!   [`JobQueue::purge_finished`] drops the ones older than the retention
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{Job, JobQueue, JobStatus, QueueName, SqliteJobQueue};
//!
//! let queue = SqliteJobQueue::new(pool, clock, 3);
//! queue.initialize().await?;
//! queue.queue(Job::LibraryQueueCleanup).await?;
//!
//! while let Some(record) = queue.dequeue(QueueName::Library).await? {
//!     queue.complete(record.id, JobStatus::Success).await?;
//! }
//! ```

use async_trait::async_trait;
use bridge_traits::Clock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::job::{Job, JobId, JobStatus, QueueName};

/// How long finished rows are kept before a purge may drop them
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted state of a job row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(SyncError::InvalidStatus(other.to_string())),
        }
    }
}

/// A job row with its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: QueueName,
    pub job: Job,
    pub state: JobState,
    /// Status the handler reported, set once the job is finished
    pub result: Option<JobStatus>,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
}

/// Per-queue counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }

    /// Nothing waiting and nothing running
    pub fn is_idle(&self) -> bool {
        self.waiting == 0 && self.active == 0
    }
}

/// Job collaborator used by every handler
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append one job to its queue
    async fn queue(&self, job: Job) -> Result<JobId>;

    /// Append several jobs in one transaction, keeping their order
    async fn queue_all(&self, jobs: Vec<Job>) -> Result<Vec<JobId>>;

    /// Claim the oldest waiting job, `None` when empty or paused
    async fn dequeue(&self, queue: QueueName) -> Result<Option<JobRecord>>;

    /// Record the handler's status for an active job
    async fn complete(&self, id: JobId, status: JobStatus) -> Result<()>;

    /// Record a handler error
    ///
    /// # Returns
    /// `Waiting` when the job will run again, `Failed` once attempts are used up
    async fn fail(&self, id: JobId, error: &str) -> Result<JobState>;

    async fn get_job_counts(&self, queue: QueueName) -> Result<JobCounts>;

    /// Stop handing out jobs from the queue until resumed
    async fn pause(&self, queue: QueueName) -> Result<()>;

    async fn resume(&self, queue: QueueName) -> Result<()>;

    async fn is_paused(&self, queue: QueueName) -> Result<bool>;

    /// Put jobs left active by a previous process back to waiting
    async fn requeue_stalled(&self) -> Result<u64>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Jobs of a queue in a state, oldest first
    async fn find_by_state(&self, queue: QueueName, state: JobState) -> Result<Vec<JobRecord>>;

    /// Delete completed and failed rows last touched before the retention
    /// window, across every queue. Returns the number of rows removed.
    async fn purge_finished(&self) -> Result<u64>;
}

/// SQLite implementation of JobQueue
pub struct SqliteJobQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retention: Duration,
}

const JOB_COLUMNS: &str = "id, queue, name, data, state, result, attempts, error_message, \
                           created_at, updated_at, started_at";

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            pool,
            clock,
            max_attempts: max_attempts.max(1),
            retention: DEFAULT_JOB_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                state TEXT NOT NULL,
                result TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_queue_state
            ON jobs(queue, state, created_at ASC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_state (
                queue TEXT PRIMARY KEY,
                paused INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<JobRecord> {
        let id: String = row.get("id");
        let queue: String = row.get("queue");
        let name: String = row.get("name");
        let data: String = row.get("data");
        let state: String = row.get("state");
        let result: Option<String> = row.get("result");
        let attempts: i64 = row.get("attempts");

        Ok(JobRecord {
            id: JobId::from_string(&id)?,
            queue: queue.parse()?,
            job: Job::from_parts(&name, &data)?,
            state: state.parse()?,
            result: result.map(|r| r.parse()).transpose()?,
            attempts: attempts.max(0) as u32,
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
        })
    }

    async fn set_paused(&self, queue: QueueName, paused: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_state (queue, paused, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(queue) DO UPDATE SET
                paused = excluded.paused,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(queue.as_str())
        .bind(paused)
        .bind(self.clock.unix_timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        info!(queue = %queue, paused, "Queue state changed");
        Ok(())
    }

    /// Mark a claimed row that can no longer be decoded as failed.
    async fn reject(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(self.clock.unix_timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn queue(&self, job: Job) -> Result<JobId> {
        let mut ids = self.queue_all(vec![job]).await?;
        ids.pop()
            .ok_or_else(|| SyncError::Queue("No job id returned".to_string()))
    }

    async fn queue_all(&self, jobs: Vec<Job>) -> Result<Vec<JobId>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.unix_timestamp_millis();
        let mut ids = Vec::with_capacity(jobs.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        for job in &jobs {
            let id = JobId::new();
            sqlx::query(
                r#"
                INSERT INTO jobs (id, queue, name, data, state, attempts, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'waiting', 0, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(job.queue().as_str())
            .bind(job.name())
            .bind(job.data_json()?)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
            ids.push(id);
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(count = ids.len(), first = jobs[0].name(), "Queued jobs");
        Ok(ids)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<JobRecord>> {
        loop {
            let now = self.clock.unix_timestamp_millis();
            let row = sqlx::query(&format!(
                r#"
                UPDATE jobs
                SET state = 'active', attempts = attempts + 1, started_at = ?, updated_at = ?
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = ? AND state = 'waiting'
                      AND NOT EXISTS (
                          SELECT 1 FROM queue_state WHERE queue = ? AND paused = 1
                      )
                    ORDER BY created_at ASC, rowid ASC
                    LIMIT 1
                )
                RETURNING {}
                "#,
                JOB_COLUMNS
            ))
            .bind(now)
            .bind(now)
            .bind(queue.as_str())
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

            let Some(row) = row else {
                return Ok(None);
            };

            match Self::row_to_record(&row) {
                Ok(record) => {
                    debug!(
                        job_id = %record.id,
                        job = record.job.name(),
                        attempt = record.attempts,
                        "Dequeued job"
                    );
                    return Ok(Some(record));
                }
                Err(e) => {
                    let id: String = row.get("id");
                    warn!(job_id = %id, error = %e, "Dropping undecodable job");
                    self.reject(&id, &e.to_string()).await?;
                }
            }
        }
    }

    async fn complete(&self, id: JobId, status: JobStatus) -> Result<()> {
        let state = match status {
            JobStatus::Failed => JobState::Failed,
            JobStatus::Success | JobStatus::Skipped => JobState::Completed,
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = ?, result = ?, updated_at = ?
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(state.as_str())
        .bind(status.as_str())
        .bind(self.clock.unix_timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: id.to_string(),
            });
        }

        debug!(job_id = %id, status = %status, "Job finished");
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<JobState> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = CASE WHEN attempts >= ? THEN 'failed' ELSE 'waiting' END,
                error_message = ?,
                started_at = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'active'
            RETURNING state, attempts
            "#,
        )
        .bind(i64::from(self.max_attempts))
        .bind(error)
        .bind(self.clock.unix_timestamp_millis())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?
        .ok_or_else(|| SyncError::JobNotFound {
            job_id: id.to_string(),
        })?;

        let state: String = row.get("state");
        let attempts: i64 = row.get("attempts");
        let state: JobState = state.parse()?;

        if state == JobState::Waiting {
            warn!(
                job_id = %id,
                attempts,
                max_attempts = self.max_attempts,
                error,
                "Job failed, will retry"
            );
        } else {
            warn!(job_id = %id, attempts, error, "Job failed permanently after max attempts");
        }

        Ok(state)
    }

    async fn get_job_counts(&self, queue: QueueName) -> Result<JobCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs WHERE queue = ? GROUP BY state")
            .bind(queue.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut counts = JobCounts {
            paused: self.is_paused(queue).await?,
            ..JobCounts::default()
        };

        for row in rows {
            let state: String = row.get("state");
            let count: i64 = row.get("count");
            let count = count.max(0) as u64;
            match state.parse::<JobState>()? {
                JobState::Waiting => counts.waiting = count,
                JobState::Active => counts.active = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }

    async fn pause(&self, queue: QueueName) -> Result<()> {
        self.set_paused(queue, true).await
    }

    async fn resume(&self, queue: QueueName) -> Result<()> {
        self.set_paused(queue, false).await
    }

    async fn is_paused(&self, queue: QueueName) -> Result<bool> {
        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM queue_state WHERE queue = ?")
                .bind(queue.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(paused.unwrap_or(false))
    }

    async fn requeue_stalled(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'waiting', started_at = NULL, updated_at = ? WHERE state = 'active'",
        )
        .bind(self.clock.unix_timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(requeued, "Requeued jobs left active by a previous run");
        }
        Ok(requeued)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_state(&self, queue: QueueName, state: JobState) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE queue = ? AND state = ? ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        ))
        .bind(queue.as_str())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn purge_finished(&self) -> Result<u64> {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.unix_timestamp_millis().saturating_sub(retention);

        let result = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('completed', 'failed') AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, cutoff, "Purged finished jobs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{LibraryDelete, QueueSyncDirectories, SidecarDiscovery};
    use bridge_traits::ManualClock;
    use core_library::db::create_test_pool;

    async fn setup(max_attempts: u32) -> SqliteJobQueue {
        let pool = create_test_pool().await.unwrap();
        let queue = SqliteJobQueue::new(pool, Arc::new(ManualClock::new(1_000)), max_attempts);
        queue.initialize().await.unwrap();
        queue
    }

    fn scan(library_id: &str) -> Job {
        Job::QueueSyncDirectories(QueueSyncDirectories {
            library_id: library_id.to_string(),
            force: false,
        })
    }

    #[test]
    fn test_job_state() {
        assert_eq!(JobState::Waiting.as_str(), "waiting");
        assert_eq!("active".parse::<JobState>().unwrap(), JobState::Active);
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!("paused".parse::<JobState>().is_err());
    }

    #[tokio::test]
    async fn test_dequeue_in_insertion_order() {
        let queue = setup(3).await;
        queue
            .queue_all(vec![scan("a"), scan("b"), scan("c")])
            .await
            .unwrap();

        let first = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        assert_eq!(first.job, scan("a"));
        assert_eq!(first.state, JobState::Active);
        assert_eq!(first.attempts, 1);

        let second = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        assert_eq!(second.job, scan("b"));

        let counts = queue.get_job_counts(QueueName::Library).await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 2);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn test_jobs_are_routed_by_queue() {
        let queue = setup(3).await;
        queue
            .queue(Job::SidecarDiscovery(SidecarDiscovery {
                id: "asset".to_string(),
                directory_id: "dir".to_string(),
            }))
            .await
            .unwrap();

        assert!(queue.dequeue(QueueName::Library).await.unwrap().is_none());
        let record = queue.dequeue(QueueName::Discovery).await.unwrap().unwrap();
        assert_eq!(record.queue, QueueName::Discovery);
    }

    #[tokio::test]
    async fn test_complete_records_result() {
        let queue = setup(3).await;
        queue.queue(scan("a")).await.unwrap();
        queue.queue(scan("b")).await.unwrap();

        let ok = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        queue.complete(ok.id, JobStatus::Skipped).await.unwrap();
        let bad = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        queue.complete(bad.id, JobStatus::Failed).await.unwrap();

        let ok = queue.find_by_id(ok.id).await.unwrap().unwrap();
        assert_eq!(ok.state, JobState::Completed);
        assert_eq!(ok.result, Some(JobStatus::Skipped));

        let bad = queue.find_by_id(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.state, JobState::Failed);

        // Only active jobs can be completed
        assert!(matches!(
            queue.complete(ok.id, JobStatus::Success).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_retries_until_max_attempts() {
        let queue = setup(2).await;
        let id = queue.queue(scan("a")).await.unwrap();

        queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        assert_eq!(queue.fail(id, "disk gone").await.unwrap(), JobState::Waiting);

        let retry = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        assert_eq!(retry.attempts, 2);
        assert_eq!(retry.error_message.as_deref(), Some("disk gone"));
        assert_eq!(queue.fail(id, "disk gone").await.unwrap(), JobState::Failed);

        assert!(queue.dequeue(QueueName::Library).await.unwrap().is_none());
        let counts = queue.get_job_counts(QueueName::Library).await.unwrap();
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let queue = setup(3).await;
        queue.queue(scan("a")).await.unwrap();

        queue.pause(QueueName::Library).await.unwrap();
        assert!(queue.is_paused(QueueName::Library).await.unwrap());
        assert!(queue.dequeue(QueueName::Library).await.unwrap().is_none());
        assert!(queue.get_job_counts(QueueName::Library).await.unwrap().paused);

        queue.resume(QueueName::Library).await.unwrap();
        assert!(queue.dequeue(QueueName::Library).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requeue_stalled() {
        let queue = setup(3).await;
        queue.queue(scan("a")).await.unwrap();
        queue.dequeue(QueueName::Library).await.unwrap().unwrap();

        assert_eq!(queue.requeue_stalled().await.unwrap(), 1);
        let waiting = queue
            .find_by_state(QueueName::Library, JobState::Waiting)
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].started_at, None);
    }

    #[tokio::test]
    async fn test_purge_drops_only_expired_finished_jobs() {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = SqliteJobQueue::new(pool, clock.clone(), 1)
            .with_retention(Duration::from_secs(60));
        queue.initialize().await.unwrap();

        for library in ["a", "b", "c"] {
            queue.queue(scan(library)).await.unwrap();
        }
        let done = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        queue.complete(done.id, JobStatus::Success).await.unwrap();
        let broken = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        queue.fail(broken.id, "disk gone").await.unwrap();

        // Inside the window nothing goes
        clock.advance_millis(30_000);
        assert_eq!(queue.purge_finished().await.unwrap(), 0);

        // The last job waited past the window but finished inside it
        clock.advance_millis(31_000);
        let recent = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        queue.complete(recent.id, JobStatus::Skipped).await.unwrap();
        queue.queue(scan("d")).await.unwrap();

        assert_eq!(queue.purge_finished().await.unwrap(), 2);
        assert!(queue.find_by_id(done.id).await.unwrap().is_none());
        assert!(queue.find_by_id(recent.id).await.unwrap().is_some());

        let counts = queue.get_job_counts(QueueName::Library).await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let queue = setup(3).await;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, name, data, state, created_at, updated_at)
            VALUES ('00000000-0000-0000-0000-000000000001', 'library', 'transcode', '{}', 'waiting', 0, 0)
            "#,
        )
        .execute(&queue.pool)
        .await
        .unwrap();
        queue
            .queue(Job::LibraryDelete(LibraryDelete {
                id: "lib".to_string(),
            }))
            .await
            .unwrap();

        let record = queue.dequeue(QueueName::Library).await.unwrap().unwrap();
        assert_eq!(record.job.name(), "library-delete");
        assert_eq!(queue.get_job_counts(QueueName::Library).await.unwrap().failed, 1);
    }
}
