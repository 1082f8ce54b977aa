//! # Library Watcher
//!
//! Turns filesystem notifications under a library's import paths into jobs.
//!
//! ## Overview
//!
//! One subscription is kept per library. Events on supported media files
//! that match no exclusion pattern become single-path jobs:
//!
//! - add → `sync-files` with `force: false`
//! - change → `sync-files` with `force: true`, so the existing asset is
//!   re-offered to downstream extraction
//! - unlink → `asset-removal`
//!
//! Everything else is logged and dropped. The containing directory row is
//! resolved with an insert-or-ignore before a `sync-files` job is queued.
//!
//! Only the instance holding the watch lock should call into this type; the
//! engine façade enforces that.

use async_trait::async_trait;
use bridge_traits::paths::{normalize_path, parent_dir};
use bridge_traits::{
    ExclusionMatcher, ExtensionFilter, PathMatcher, WatchEvent, WatchHandler, WatchOptions,
    WatchSubscription,
};
use core_library::Library;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::job::{AssetRemoval, Job, SyncFiles};

pub struct LibraryWatcher {
    ctx: SyncContext,
    subscriptions: Mutex<HashMap<String, Box<dyn WatchSubscription>>>,
}

impl LibraryWatcher {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// (Re)start watching a library.
    ///
    /// # Returns
    /// `false` when the library has no import paths to watch
    pub async fn watch(&self, library_id: &str) -> Result<bool> {
        let library = self
            .ctx
            .live_library(library_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Library", library_id))?;

        self.unwatch(library_id).await;

        if library.import_paths.is_empty() {
            debug!(library_id, "Library has no import paths, not watching");
            return Ok(false);
        }

        info!(
            library_id,
            import_paths = ?library.import_paths,
            "Starting to watch library"
        );

        let handler = Arc::new(LibraryEventHandler::new(self.ctx.clone(), &library)?);
        let roots: Vec<PathBuf> = library.import_paths.iter().map(PathBuf::from).collect();
        let subscription = self
            .ctx
            .fs
            .watch(&roots, WatchOptions::default(), handler)
            .await?;

        self.subscriptions
            .lock()
            .await
            .insert(library.id, subscription);
        Ok(true)
    }

    pub async fn unwatch(&self, library_id: &str) {
        let subscription = self.subscriptions.lock().await.remove(library_id);
        if let Some(subscription) = subscription {
            subscription.close().await;
            debug!(library_id, "Stopped watching library");
        }
    }

    /// Watch every live library. A library whose watch fails is logged and
    /// skipped.
    ///
    /// # Returns
    /// Number of libraries now watched
    pub async fn watch_all(&self) -> Result<usize> {
        let libraries = self.ctx.libraries.find_all(false).await?;
        let mut watched = 0;

        for library in libraries {
            match self.watch(&library.id).await {
                Ok(true) => watched += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(library_id = %library.id, error = %e, "Failed to watch library")
                }
            }
        }

        info!(watched, "Library watchers started");
        Ok(watched)
    }

    pub async fn unwatch_all(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().await.drain().collect();
        let count = subscriptions.len();
        for (_, subscription) in subscriptions {
            subscription.close().await;
        }
        if count > 0 {
            info!(count, "Library watchers stopped");
        }
    }

    pub async fn is_watching(&self, library_id: &str) -> bool {
        self.subscriptions.lock().await.contains_key(library_id)
    }
}

/// Event sink for one library's subscription
pub struct LibraryEventHandler {
    ctx: SyncContext,
    library_id: String,
    owner_id: String,
    matcher: PathMatcher,
}

impl LibraryEventHandler {
    pub fn new(ctx: SyncContext, library: &Library) -> Result<Self> {
        let matcher = PathMatcher::new(
            ExtensionFilter::new(&ctx.settings.supported_extensions),
            ExclusionMatcher::new(&library.exclusion_patterns)?,
        );
        Ok(Self {
            ctx,
            library_id: library.id.clone(),
            owner_id: library.owner_id.clone(),
            matcher,
        })
    }

    async fn on_file(&self, event: &str, path: PathBuf, force: bool) -> Result<()> {
        let path = normalize_path(path);
        if !self.matcher.matches(&path) {
            trace!(library_id = %self.library_id, event, path = %path, "Ignoring file event");
            return Ok(());
        }

        let Some(parent) = parent_dir(&path) else {
            return Ok(());
        };
        debug!(library_id = %self.library_id, event, path = %path, "File event received");

        self.ctx
            .directories
            .create_all(
                &self.library_id,
                &self.owner_id,
                std::slice::from_ref(&parent),
                self.ctx.now(),
            )
            .await?;
        let Some(directory) = self
            .ctx
            .directories
            .find_by_path(&self.library_id, &parent)
            .await?
        else {
            warn!(library_id = %self.library_id, directory = %parent, "Directory vanished before queuing file");
            return Ok(());
        };

        self.ctx
            .jobs
            .queue(Job::SyncFiles(SyncFiles {
                library_id: self.library_id.clone(),
                directory_id: directory.id,
                paths: vec![path],
                progress_counter: 1,
                total_assets: Some(1),
                force,
            }))
            .await?;
        Ok(())
    }

    async fn on_unlink(&self, path: PathBuf) -> Result<()> {
        let path = normalize_path(path);
        debug!(library_id = %self.library_id, path = %path, "File unlink event received");
        self.ctx
            .jobs
            .queue(Job::AssetRemoval(AssetRemoval {
                library_id: self.library_id.clone(),
                paths: vec![path],
            }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WatchHandler for LibraryEventHandler {
    async fn handle(&self, event: WatchEvent) {
        let result = match event {
            WatchEvent::Add(path) => self.on_file("add", path, false).await,
            WatchEvent::Change(path) => self.on_file("change", path, true).await,
            WatchEvent::Unlink(path) => self.on_unlink(path).await,
            WatchEvent::Error(message) => {
                error!(library_id = %self.library_id, error = %message, "Library watcher encountered error");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(library_id = %self.library_id, error = %e, "Failed to queue job for file event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QueueName;
    use crate::test_support::Harness;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{AccessMode, CrawlOptions, FileMetadata, FileSystemAccess, PathBatches};
    use mockall::mock;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn stat(&self, path: &Path) -> BridgeResult<FileMetadata>;
            async fn check_access(&self, path: &Path, mode: AccessMode) -> BridgeResult<bool>;
            fn walk(&self, options: CrawlOptions) -> PathBatches;
            async fn watch(
                &self,
                paths: &[PathBuf],
                options: WatchOptions,
                handler: Arc<dyn WatchHandler>,
            ) -> BridgeResult<Box<dyn WatchSubscription>>;
        }
    }

    struct CountingSubscription(Arc<AtomicUsize>);

    #[async_trait]
    impl WatchSubscription for CountingSubscription {
        async fn close(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn handler(h: &Harness, exclusions: Vec<String>) -> (Library, LibraryEventHandler) {
        let library = h.library(vec![h.root()], exclusions).await;
        let handler = LibraryEventHandler::new(h.ctx.clone(), &library).unwrap();
        (library, handler)
    }

    #[tokio::test]
    async fn test_add_and_change_queue_single_path_jobs() {
        let h = Harness::new().await;
        let (library, handler) = handler(&h, vec![]).await;

        handler
            .handle(WatchEvent::Add(PathBuf::from(h.path("2023/a.jpg"))))
            .await;
        handler
            .handle(WatchEvent::Change(PathBuf::from(h.path("2023/a.jpg"))))
            .await;

        let directory = h
            .ctx
            .directories
            .find_by_path(&library.id, &h.path("2023"))
            .await
            .unwrap()
            .unwrap();

        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(jobs.len(), 2);
        let (Job::SyncFiles(add), Job::SyncFiles(change)) = (&jobs[0], &jobs[1]) else {
            panic!("unexpected jobs {:?}", jobs);
        };
        assert_eq!(add.paths, vec![h.path("2023/a.jpg")]);
        assert_eq!(add.directory_id, directory.id);
        assert!(!add.force);
        assert_eq!(change.directory_id, directory.id);
        assert!(change.force);
    }

    #[tokio::test]
    async fn test_unsupported_and_excluded_files_are_dropped() {
        let h = Harness::new().await;
        let (_, handler) = handler(&h, vec!["**/@eaDir/**".to_string()]).await;

        handler
            .handle(WatchEvent::Add(PathBuf::from(h.path("notes.txt"))))
            .await;
        handler
            .handle(WatchEvent::Add(PathBuf::from(h.path("@eaDir/a.jpg"))))
            .await;
        handler
            .handle(WatchEvent::Error("inotify limit reached".to_string()))
            .await;

        assert!(h.waiting(QueueName::Library).await.is_empty());
    }

    #[tokio::test]
    async fn test_unlink_queues_removal() {
        let h = Harness::new().await;
        let (library, handler) = handler(&h, vec![]).await;

        handler
            .handle(WatchEvent::Unlink(PathBuf::from(h.path("2023/a.jpg"))))
            .await;

        assert_eq!(
            h.waiting(QueueName::Library).await,
            vec![Job::AssetRemoval(AssetRemoval {
                library_id: library.id,
                paths: vec![h.path("2023/a.jpg")],
            })]
        );
    }

    #[tokio::test]
    async fn test_watch_lifecycle() {
        let h = Harness::new().await;
        let closed = Arc::new(AtomicUsize::new(0));

        let mut fs = MockFs::new();
        let root = h.root();
        let counter = closed.clone();
        fs.expect_watch()
            .withf(move |paths, _, _| paths.len() == 1 && paths[0] == PathBuf::from(&root))
            .times(2)
            .returning(move |_, _, _| {
                Ok(Box::new(CountingSubscription(counter.clone())) as Box<dyn WatchSubscription>)
            });

        let mut ctx = h.ctx.clone();
        ctx.fs = Arc::new(fs);
        let watcher = LibraryWatcher::new(ctx);

        let library = h.library(vec![h.root()], vec![]).await;
        let empty = h.library(vec![], vec![]).await;

        assert!(watcher.watch(&library.id).await.unwrap());
        assert!(watcher.is_watching(&library.id).await);
        assert!(!watcher.watch(&empty.id).await.unwrap());
        assert!(!watcher.is_watching(&empty.id).await);

        // Rewatching replaces the old subscription
        assert!(watcher.watch(&library.id).await.unwrap());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        watcher.unwatch_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(!watcher.is_watching(&library.id).await);
    }

    #[tokio::test]
    async fn test_watch_missing_library() {
        let h = Harness::new().await;
        let watcher = LibraryWatcher::new(h.ctx.clone());
        assert!(matches!(
            watcher.watch("missing").await,
            Err(SyncError::NotFound { .. })
        ));
    }
}
