//! # Library Synchronization Engine
//!
//! Keeps the directory and asset registry of each library in step with what
//! is on disk under its import paths.
//!
//! ## Overview
//!
//! All work is expressed as jobs on a durable queue. Each handler does one
//! bounded step and queues the next ones:
//!
//! - **Directory Synchronizer** (`directory_sync`): crawls import roots and
//!   registers directories
//! - **File Synchronizer** (`file_sync`): registers media files of one
//!   directory, builds its auto-album and queues discovery work
//! - **Asset Reconciler** (`reconciler`): flips assets offline or back online
//! - **Library Watcher** (`watcher`): turns file notifications into jobs
//! - **Library Lifecycle** (`lifecycle`): CRUD, scans and two-phase deletion
//!
//! ## Components
//!
//! - **Job Model** (`job`): typed payloads with their wire names
//! - **Job Queue** (`queue`): SQLite-backed queue with retries and pause state
//! - **Advisory Locks** (`lock`): leases deciding which instance watches
//! - **Workers** (`worker`): dispatcher and worker pool
//! - **Path Validator** (`validator`): checks import roots before crawling

pub mod context;
pub mod directory_sync;
pub mod error;
pub mod file_sync;
pub mod job;
pub mod lifecycle;
pub mod lock;
pub mod queue;
pub mod reconciler;
pub mod validator;
pub mod watcher;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use context::{SyncContext, SyncSettings};
pub use directory_sync::DirectorySynchronizer;
pub use error::{Result, SyncError};
pub use file_sync::{fingerprint, pending_sidecar_key, FileSynchronizer};
pub use job::{
    AssetDeletion, AssetRemoval, Job, JobId, JobStatus, LibraryDelete, LibraryQueueScanAll,
    QueueName, QueueSyncAssets, QueueSyncDirectories, QueueSyncFiles, SidecarDiscovery,
    SyncAssets, SyncDirectories, SyncFiles,
};
pub use lifecycle::{CreateLibrary, LibraryService, UpdateLibrary};
pub use lock::{LockLease, LockManager, LIBRARY_WATCH_LOCK};
pub use queue::{JobCounts, JobQueue, JobRecord, JobState, SqliteJobQueue, DEFAULT_JOB_RETENTION};
pub use reconciler::{classify, AssetReconciler, AssetSyncAction};
pub use validator::{ImportPathValidation, PathValidator};
pub use watcher::{LibraryEventHandler, LibraryWatcher};
pub use worker::{JobDispatcher, JobHandler, WorkerConfig, WorkerPool};
