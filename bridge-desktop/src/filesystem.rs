//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{
        AccessMode, CrawlOptions, FileMetadata, FileSystemAccess, PathBatches, WatchHandler,
        WatchOptions, WatchSubscription,
    },
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

use crate::crawler::DiskCrawler;
use crate::watcher::watch_paths;

/// Tokio-based file system implementation
///
/// Provides the engine's disk operations using:
/// - `tokio::fs` for stat and access checks
/// - [`DiskCrawler`] for paginated traversal
/// - `notify` for change subscriptions
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    fn to_millis(time: std::io::Result<SystemTime>) -> Option<i64> {
        time.ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            created_at: Self::to_millis(metadata.created()),
            modified_at: Self::to_millis(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn check_access(&self, path: &Path, mode: AccessMode) -> Result<bool> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Self::map_io_error(e)),
        };

        let allowed = match mode {
            AccessMode::Exists => true,
            // Opening is the only portable way to learn whether reads will succeed.
            AccessMode::Read if metadata.is_dir() => fs::read_dir(path).await.is_ok(),
            AccessMode::Read => fs::File::open(path).await.is_ok(),
            AccessMode::Write => !metadata.permissions().readonly(),
        };

        debug!(path = ?path, ?mode, allowed, "Checked file access");
        Ok(allowed)
    }

    fn walk(&self, options: CrawlOptions) -> PathBatches {
        debug!(
            roots = ?options.roots,
            mode = ?options.mode,
            page_size = options.page_size,
            "Starting crawl"
        );
        DiskCrawler::stream(options)
    }

    async fn watch(
        &self,
        paths: &[PathBuf],
        options: WatchOptions,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<Box<dyn WatchSubscription>> {
        let subscription = watch_paths(paths, options, handler)?;
        Ok(Box::new(subscription))
    }
}
