//! # Library Engine
//!
//! One handle per process that owns the database pool, the durable queue,
//! the library-queue workers and, when this instance wins the watch lock,
//! the filesystem watchers and the periodic scan trigger.
//!
//! ## Startup
//!
//! 1. Jobs left `active` by a crashed process are put back to `waiting`
//! 2. The `library-watch` lease is tried once; losing it means this instance
//!    never watches and never schedules scans
//! 3. The lease holder renews it in the background, watches every live
//!    library when watching is enabled, and queues a scan-all on every tick
//!    of the configured interval
//! 4. Every instance drops finished job rows older than the retention on
//!    start and then hourly
//! 5. The worker pool starts draining the `library` queue
//!
//! A renewal that fails for any reason other than another owner holding the
//! lock is retried on the next tick, until the lease's own expiry passes.
//!
//! `shutdown` reverses all of that and releases the lease.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{Clock, CounterStore, FileSystemAccess};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{Directory, Library, LibraryStatistics};
use core_runtime::EngineConfig;
use core_sync::{
    CreateLibrary, ImportPathValidation, JobCounts, JobDispatcher, JobQueue, LibraryService,
    LibraryWatcher, LockLease, LockManager, QueueName, SqliteJobQueue, SyncContext, SyncError,
    UpdateLibrary, WorkerConfig, WorkerPool, LIBRARY_WATCH_LOCK,
};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

/// Lifetime of the watch lease between renewals
pub const WATCH_LOCK_TTL: Duration = Duration::from_secs(60);

/// Time between purges of expired job rows
pub const JOB_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Host capabilities the engine runs on.
#[derive(Clone)]
pub struct EngineDependencies {
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub counters: Arc<dyn CounterStore>,
    pub clock: Arc<dyn Clock>,
}

impl EngineDependencies {
    pub fn new(
        filesystem: Arc<dyn FileSystemAccess>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            filesystem,
            counters,
            clock,
        }
    }
}

pub struct LibraryEngine {
    config: EngineConfig,
    pool: SqlitePool,
    queue: Arc<SqliteJobQueue>,
    locks: Arc<LockManager>,
    service: LibraryService,
    watcher: Arc<LibraryWatcher>,
    workers: WorkerPool,
    clock: Arc<dyn Clock>,
    watch_enabled: AtomicBool,
    lease: Arc<Mutex<Option<LockLease>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LibraryEngine {
    /// Open the configured database and wire the engine over it.
    pub async fn new(config: EngineConfig, deps: EngineDependencies) -> Result<Self> {
        config.validate()?;
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        Self::with_pool(config, pool, deps).await
    }

    /// Wire the engine over an already migrated pool.
    pub async fn with_pool(
        config: EngineConfig,
        pool: SqlitePool,
        deps: EngineDependencies,
    ) -> Result<Self> {
        let queue = Arc::new(SqliteJobQueue::new(
            pool.clone(),
            deps.clock.clone(),
            config.max_job_attempts,
        )
        .with_retention(config.job_retention));
        queue.initialize().await?;

        let locks = Arc::new(LockManager::new(pool.clone(), deps.clock.clone()));
        locks.initialize().await?;

        let ctx = SyncContext::sqlite(
            pool.clone(),
            &config,
            queue.clone(),
            deps.filesystem,
            deps.counters,
            deps.clock.clone(),
        );
        let workers = WorkerPool::new(
            queue.clone(),
            Arc::new(JobDispatcher::new(ctx.clone())),
            QueueName::Library,
            WorkerConfig::from_config(&config),
        );

        Ok(Self {
            watch_enabled: AtomicBool::new(config.watch.enabled),
            service: LibraryService::new(ctx.clone()),
            watcher: Arc::new(LibraryWatcher::new(ctx)),
            config,
            pool,
            queue,
            locks,
            workers,
            clock: deps.clock,
            lease: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[instrument(skip(self), fields(owner = %self.locks.owner()))]
    pub async fn start(&self) -> Result<()> {
        let requeued = self.queue.requeue_stalled().await?;
        if requeued > 0 {
            info!(requeued, "Requeued jobs left active by a previous run");
        }

        if self.acquire_watch_lock().await? {
            self.spawn_lease_renewal().await;

            if self.config.scan.enabled {
                self.spawn_scan_scheduler(self.config.scan.interval).await;
            }

            if self.watch_enabled.load(Ordering::SeqCst) {
                let watched = self.watcher.watch_all().await?;
                info!(watched, "Watching libraries");
            }
        } else {
            info!("Another instance holds the watch lock, not watching libraries");
        }

        self.spawn_job_purge().await;
        self.workers.start().await;
        info!("Library engine started");
        Ok(())
    }

    /// Stop background tasks and workers, drop watchers and release the lease.
    ///
    /// In-flight jobs run to completion; nothing new is dispatched.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task ended abnormally");
            }
        }

        self.workers.stop().await;
        self.watcher.unwatch_all().await;

        if let Some(lease) = self.lease.lock().await.take() {
            self.locks.release(lease).await?;
        }

        info!("Library engine stopped");
        Ok(())
    }

    pub async fn holds_watch_lock(&self) -> bool {
        self.lease.lock().await.is_some()
    }

    /// Turn watching on or off at runtime; only the lease holder acts on it.
    pub async fn set_watch_enabled(&self, enabled: bool) -> Result<()> {
        let previous = self.watch_enabled.swap(enabled, Ordering::SeqCst);
        if previous == enabled || !self.holds_watch_lock().await {
            return Ok(());
        }

        if enabled {
            let watched = self.watcher.watch_all().await?;
            info!(watched, "Watching enabled");
        } else {
            self.watcher.unwatch_all().await;
            info!("Watching disabled");
        }
        Ok(())
    }

    pub async fn is_watching(&self, library_id: &str) -> bool {
        self.watcher.is_watching(library_id).await
    }

    async fn should_watch(&self) -> bool {
        self.watch_enabled.load(Ordering::SeqCst) && self.holds_watch_lock().await
    }

    async fn acquire_watch_lock(&self) -> Result<bool> {
        let lease = self
            .locks
            .try_acquire(LIBRARY_WATCH_LOCK, WATCH_LOCK_TTL)
            .await?;
        let acquired = lease.is_some();
        *self.lease.lock().await = lease;
        Ok(acquired)
    }

    async fn spawn_lease_renewal(&self) {
        let locks = self.locks.clone();
        let lease = self.lease.clone();
        let watcher = self.watcher.clone();
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();
        let period = WATCH_LOCK_TTL / 3;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                if !renew_lease(&locks, &lease, &watcher, clock.as_ref()).await {
                    break;
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_scan_scheduler(&self, interval: Duration) {
        let service = self.service.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = service.queue_scan_all(false).await {
                            warn!(error = %err, "Scheduled scan failed to queue");
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_job_purge(&self) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(JOB_PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = queue.purge_finished().await {
                            warn!(error = %err, "Failed to purge finished jobs");
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    pub async fn create_library(&self, request: CreateLibrary) -> Result<Library> {
        let library = self.service.create(request).await?;
        if self.should_watch().await {
            self.watcher.watch(&library.id).await?;
        }
        Ok(library)
    }

    pub async fn get_library(&self, id: &str) -> Result<Library> {
        Ok(self.service.get(id).await?)
    }

    pub async fn get_libraries(&self) -> Result<Vec<Library>> {
        Ok(self.service.get_all().await?)
    }

    /// Apply an update and rebuild the library's watcher from the new paths.
    pub async fn update_library(&self, id: &str, request: UpdateLibrary) -> Result<Library> {
        let library = self.service.update(id, request).await?;
        if self.should_watch().await {
            self.watcher.watch(&library.id).await?;
        }
        Ok(library)
    }

    pub async fn delete_library(&self, id: &str) -> Result<()> {
        self.watcher.unwatch(id).await;
        Ok(self.service.delete(id).await?)
    }

    pub async fn validate(&self, import_paths: &[String]) -> Vec<ImportPathValidation> {
        self.service.validate(import_paths).await
    }

    pub async fn statistics(&self, id: &str) -> Result<LibraryStatistics> {
        Ok(self.service.statistics(id).await?)
    }

    pub async fn set_directory_hidden(&self, directory_id: &str, hidden: bool) -> Result<Directory> {
        Ok(self.service.set_directory_hidden(directory_id, hidden).await?)
    }

    pub async fn queue_scan(&self, id: &str, force: bool) -> Result<()> {
        Ok(self.service.queue_scan(id, force).await?)
    }

    pub async fn queue_scan_all(&self, force: bool) -> Result<()> {
        Ok(self.service.queue_scan_all(force).await?)
    }

    pub async fn job_counts(&self, queue: QueueName) -> Result<JobCounts> {
        Ok(self.queue.get_job_counts(queue).await?)
    }

    pub async fn pause(&self, queue: QueueName) -> Result<()> {
        Ok(self.queue.pause(queue).await?)
    }

    pub async fn resume(&self, queue: QueueName) -> Result<()> {
        Ok(self.queue.resume(queue).await?)
    }

    /// Drop completed and failed jobs older than the configured retention.
    pub async fn purge_finished_jobs(&self) -> Result<u64> {
        Ok(self.queue.purge_finished().await?)
    }

    /// Run library-queue jobs inline until the queue is empty.
    pub async fn process_pending(&self) -> Result<u64> {
        Ok(self.workers.run_until_idle().await?)
    }
}

/// Whether a failed renewal means the lease is gone.
fn lease_lost(err: &SyncError, lease: &LockLease, now: i64) -> bool {
    matches!(err, SyncError::LockUnavailable(_)) || now >= lease.expires_at
}

/// One renewal attempt. Returns false once this instance no longer holds the
/// lease, after its watchers have been dropped.
async fn renew_lease(
    locks: &LockManager,
    lease: &Mutex<Option<LockLease>>,
    watcher: &LibraryWatcher,
    clock: &dyn Clock,
) -> bool {
    let mut guard = lease.lock().await;
    let Some(current) = guard.as_mut() else {
        return false;
    };

    let err = match locks.renew(current, WATCH_LOCK_TTL).await {
        Ok(()) => {
            debug!(expires_at = current.expires_at, "Renewed watch lock");
            return true;
        }
        Err(err) => err,
    };

    if !lease_lost(&err, current, clock.unix_timestamp_millis()) {
        warn!(
            error = %err,
            expires_at = current.expires_at,
            "Failed to renew the watch lock, retrying"
        );
        return true;
    }

    warn!(error = %err, "Lost the watch lock, dropping watchers");
    *guard = None;
    drop(guard);
    watcher.unwatch_all().await;
    false
}
