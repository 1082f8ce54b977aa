//! Fixture shared by the integration suites: a full engine over an in-memory
//! database and a temp dir, drained inline instead of by background workers.

#![allow(dead_code)]

use bridge_desktop::{SqliteCounterStore, TokioFileSystem};
use bridge_traits::paths::normalize_path;
use bridge_traits::ManualClock;
use core_library::db::create_test_pool;
use core_library::{Asset, Directory, DirectoryStatus, Library};
use core_runtime::EngineConfig;
use core_sync::{
    CreateLibrary, Job, JobDispatcher, JobHandler, JobQueue, JobState, LibraryService, QueueName,
    SqliteJobQueue, SyncContext, WorkerConfig, WorkerPool,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEngine {
    pub pool: SqlitePool,
    pub ctx: SyncContext,
    pub queue: Arc<SqliteJobQueue>,
    pub dispatcher: Arc<JobDispatcher>,
    pub service: LibraryService,
    pub clock: Arc<ManualClock>,
    workers: WorkerPool,
    dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(|builder| builder).await
    }

    pub async fn with_config(
        configure: impl FnOnce(core_runtime::EngineConfigBuilder) -> core_runtime::EngineConfigBuilder,
    ) -> Self {
        let config = configure(
            EngineConfig::builder()
                .database_path(":memory:")
                .media_location("/srv/media/upload"),
        )
        .build()
        .unwrap();

        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = Arc::new(SqliteJobQueue::new(
            pool.clone(),
            clock.clone(),
            config.max_job_attempts,
        )
        .with_retention(config.job_retention));
        queue.initialize().await.unwrap();

        let ctx = SyncContext::sqlite(
            pool.clone(),
            &config,
            queue.clone(),
            Arc::new(TokioFileSystem::new()),
            Arc::new(SqliteCounterStore::with_pool(pool.clone()).await.unwrap()),
            clock.clone(),
        );
        let dispatcher = Arc::new(JobDispatcher::new(ctx.clone()));
        let workers = WorkerPool::new(
            queue.clone(),
            dispatcher.clone(),
            QueueName::Library,
            WorkerConfig::from_config(&config),
        );

        Self {
            pool,
            service: LibraryService::new(ctx.clone()),
            ctx,
            queue,
            dispatcher,
            clock,
            workers,
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> String {
        normalize_path(self.dir.path())
    }

    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.root(), rel)
    }

    pub async fn touch(&self, rel: &str) {
        let path = self.path(rel);
        if let Some(parent) = Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&path, rel.as_bytes()).await.unwrap();
    }

    pub async fn remove(&self, rel: &str) {
        tokio::fs::remove_file(self.path(rel)).await.unwrap();
    }

    pub async fn create_library(&self, import_paths: Vec<String>) -> Library {
        self.service
            .create(CreateLibrary {
                owner_id: "user-1".to_string(),
                import_paths,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    /// Run library-queue jobs until none are left.
    pub async fn drain(&self) -> u64 {
        self.workers.run_until_idle().await.unwrap()
    }

    /// Run one job directly, bypassing the queue.
    pub async fn run(&self, job: Job) {
        self.dispatcher.handle(job).await.unwrap();
    }

    pub async fn waiting(&self, queue: QueueName) -> Vec<Job> {
        self.queue
            .find_by_state(queue, JobState::Waiting)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.job)
            .collect()
    }

    pub async fn directories(&self, library: &Library) -> Vec<Directory> {
        self.ctx
            .directories
            .find_by_status(
                &library.id,
                &[
                    DirectoryStatus::Added,
                    DirectoryStatus::Queued,
                    DirectoryStatus::Processing,
                    DirectoryStatus::Done,
                    DirectoryStatus::Skipped,
                    DirectoryStatus::Failed,
                ],
            )
            .await
            .unwrap()
    }

    pub async fn asset(&self, rel: &str) -> Asset {
        let id: String = sqlx::query_scalar("SELECT id FROM assets WHERE original_path = ?")
            .bind(self.path(rel))
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
