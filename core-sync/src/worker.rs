//! # Job Workers
//!
//! Pulls jobs off the durable queue and routes them to their handlers.
//!
//! ## Overview
//!
//! [`JobDispatcher`] maps every job name to one handler method. [`WorkerPool`]
//! runs `concurrency` loops that each claim a job, dispatch it and record the
//! outcome:
//!
//! - `Ok(status)` is stored as the job result, `failed` for
//!   [`JobStatus::Failed`] and `completed` otherwise
//! - `Err(e)` goes through the queue retry policy
//!
//! Stopping cancels the loops between jobs; a job already running finishes
//! and its result is recorded.

use async_trait::async_trait;
use core_runtime::EngineConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::SyncContext;
use crate::directory_sync::DirectorySynchronizer;
use crate::error::Result;
use crate::file_sync::FileSynchronizer;
use crate::job::{Job, JobStatus, QueueName};
use crate::lifecycle::LibraryService;
use crate::queue::{JobQueue, JobRecord, JobState};
use crate::reconciler::AssetReconciler;

/// Runs one job to a status
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<JobStatus>;
}

/// Routes library-queue jobs to the synchronizers and the lifecycle service
pub struct JobDispatcher {
    directories: DirectorySynchronizer,
    files: FileSynchronizer,
    assets: AssetReconciler,
    lifecycle: LibraryService,
}

impl JobDispatcher {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            directories: DirectorySynchronizer::new(ctx.clone()),
            files: FileSynchronizer::new(ctx.clone()),
            assets: AssetReconciler::new(ctx.clone()),
            lifecycle: LibraryService::new(ctx),
        }
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, job: Job) -> Result<JobStatus> {
        match job {
            Job::QueueSyncDirectories(job) => {
                self.directories.handle_queue_sync_directories(job).await
            }
            Job::SyncDirectories(job) => self.directories.handle_sync_directories(job).await,
            Job::QueueSyncFiles(job) => self.files.handle_queue_sync_files(job).await,
            Job::SyncFiles(job) => self.files.handle_sync_files(job).await,
            Job::QueueSyncAssets(job) => self.assets.handle_queue_sync_assets(job).await,
            Job::SyncAssets(job) => self.assets.handle_sync_assets(job).await,
            Job::AssetRemoval(job) => self.lifecycle.handle_asset_removal(job).await,
            Job::AssetDeletion(job) => self.lifecycle.handle_asset_deletion(job).await,
            Job::LibraryDelete(job) => self.lifecycle.handle_library_delete(job).await,
            Job::LibraryQueueCleanup => self.lifecycle.handle_queue_cleanup().await,
            Job::LibraryQueueScanAll(job) => self.lifecycle.handle_queue_scan_all(job).await,
            Job::SidecarDiscovery(job) => {
                // Owned by downstream metadata stages
                warn!(asset_id = %job.id, "Sidecar discovery has no handler in this engine");
                Ok(JobStatus::Skipped)
            }
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Idle delay between polls of an empty queue
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    queue_name: QueueName,
    config: WorkerConfig,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        queue_name: QueueName,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            queue_name,
            config,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops. Calling it on a running pool does nothing.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        for i in 0..self.config.concurrency {
            let worker_id = format!("{}-w{}", self.queue_name, i);
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let shutdown = self.shutdown.clone();
            let queue_name = self.queue_name;
            let poll_interval = self.config.poll_interval;

            handles.push(tokio::spawn(async move {
                debug!(worker = %worker_id, "Worker started");
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    match queue.dequeue(queue_name).await {
                        Ok(Some(record)) => {
                            process(queue.as_ref(), handler.as_ref(), record).await;
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                        Err(e) => {
                            error!(worker = %worker_id, error = %e, "Failed to claim job");
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                    }
                }
                info!(worker = %worker_id, "Worker shutting down");
            }));
        }

        info!(
            queue = %self.queue_name,
            concurrency = self.config.concurrency,
            "Worker pool started"
        );
    }

    /// Stop claiming jobs and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        debug!(queue = %self.queue_name, "Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Process jobs inline until the queue has nothing claimable.
    ///
    /// # Returns
    /// Number of jobs processed
    pub async fn run_until_idle(&self) -> Result<u64> {
        let mut processed = 0;
        while let Some(record) = self.queue.dequeue(self.queue_name).await? {
            process(self.queue.as_ref(), self.handler.as_ref(), record).await;
            processed += 1;
        }
        Ok(processed)
    }
}

#[instrument(skip_all, fields(job_id = %record.id, job = record.job.name(), attempt = record.attempts))]
async fn process(queue: &dyn JobQueue, handler: &dyn JobHandler, record: JobRecord) {
    let id = record.id;
    let outcome = handler.handle(record.job).await;

    let recorded = match outcome {
        Ok(status) => {
            debug!(status = %status, "Job finished");
            queue.complete(id, status).await
        }
        Err(e) => {
            warn!(error = %e, "Job handler failed");
            queue.fail(id, &e.to_string()).await.map(|state| {
                if state == JobState::Failed {
                    error!("Job failed after final attempt");
                }
            })
        }
    };

    if let Err(e) = recorded {
        error!(error = %e, "Failed to record job outcome");
    }
}
