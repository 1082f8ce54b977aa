//! Shared fixture for handler tests: an in-memory database, a real disk
//! under a temp dir and a manual clock.

use bridge_desktop::{SqliteCounterStore, TokioFileSystem};
use bridge_traits::paths::normalize_path;
use bridge_traits::{Clock, ManualClock};
use core_library::db::create_test_pool;
use core_library::{Asset, Library};
use core_runtime::EngineConfig;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::context::SyncContext;
use crate::job::{Job, QueueName};
use crate::queue::{JobQueue, JobState, SqliteJobQueue};

pub const MEDIA_LOCATION: &str = "/srv/media/upload";

pub struct Harness {
    pub pool: SqlitePool,
    pub ctx: SyncContext,
    pub queue: Arc<SqliteJobQueue>,
    pub clock: Arc<ManualClock>,
    pub config: EngineConfig,
    dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_page_size(10_000).await
    }

    pub async fn with_page_size(page_size: usize) -> Self {
        let config = EngineConfig::builder()
            .database_path(":memory:")
            .media_location(MEDIA_LOCATION)
            .page_size(page_size)
            .default_exclusion_patterns(Vec::<String>::new())
            .build()
            .unwrap();
        Self::with_config(config).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));

        let queue = Arc::new(SqliteJobQueue::new(
            pool.clone(),
            clock.clone(),
            config.max_job_attempts,
        )
        .with_retention(config.job_retention));
        queue.initialize().await.unwrap();

        let counters = Arc::new(SqliteCounterStore::with_pool(pool.clone()).await.unwrap());
        let ctx = SyncContext::sqlite(
            pool.clone(),
            &config,
            queue.clone(),
            Arc::new(TokioFileSystem::new()),
            counters,
            clock.clone(),
        );

        Self {
            pool,
            ctx,
            queue,
            clock,
            config,
            dir: TempDir::new().unwrap(),
        }
    }

    /// Normalized temp dir path
    pub fn root(&self) -> String {
        normalize_path(self.dir.path())
    }

    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.root(), rel)
    }

    /// Create a file, and its parents, under the root
    pub async fn touch(&self, rel: &str) {
        let path = self.path(rel);
        if let Some(parent) = Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&path, rel.as_bytes()).await.unwrap();
    }

    pub async fn mkdir(&self, rel: &str) {
        tokio::fs::create_dir_all(self.path(rel)).await.unwrap();
    }

    pub async fn library(&self, import_paths: Vec<String>, exclusions: Vec<String>) -> Library {
        let library = Library::new(
            "user-1",
            "Photos",
            import_paths,
            exclusions,
            self.clock.unix_timestamp_millis(),
        );
        self.ctx.libraries.insert(&library).await.unwrap();
        library
    }

    /// Waiting jobs of a queue in claim order
    pub async fn waiting(&self, queue: QueueName) -> Vec<Job> {
        self.queue
            .find_by_state(queue, JobState::Waiting)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.job)
            .collect()
    }

    pub async fn asset_by_path(&self, path: &str) -> Asset {
        let id: String = sqlx::query_scalar("SELECT id FROM assets WHERE original_path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .unwrap();
        self.ctx.assets.find_by_id(&id).await.unwrap().unwrap()
    }

    pub async fn asset_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
