//! Storage Abstractions
//!
//! Filesystem and key-value capabilities consumed by the synchronization engine.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Creation time in unix milliseconds, when the platform reports it
    pub created_at: Option<i64>,
    /// Modification time in unix milliseconds
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// Access level checked by [`FileSystemAccess::check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    Read,
    Write,
}

/// Which kind of entries a crawl yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    Files,
    Directories,
}

/// Options for a lazy, paginated filesystem traversal.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Roots to traverse. Each root is normalized before use.
    pub roots: Vec<PathBuf>,
    pub mode: CrawlMode,
    /// Include entries whose name starts with a dot
    pub include_hidden: bool,
    /// Glob patterns; a matching directory is never descended into
    pub exclusion_patterns: Vec<String>,
    /// Accepted file extensions (lower case, without dot). Empty accepts every file.
    pub extensions: Vec<String>,
    /// Maximum depth below a root. `Some(1)` lists a root's direct children only.
    pub max_depth: Option<usize>,
    /// Upper bound on the number of paths per batch
    pub page_size: usize,
}

impl CrawlOptions {
    pub fn new(mode: CrawlMode, roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            mode,
            include_hidden: false,
            exclusion_patterns: Vec::new(),
            extensions: Vec::new(),
            max_depth: None,
            page_size: 10_000,
        }
    }

    pub fn with_exclusions(mut self, patterns: Vec<String>) -> Self {
        self.exclusion_patterns = patterns;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }
}

/// Finite, non-restartable sequence of path batches produced by a crawl.
pub type PathBatches = BoxStream<'static, Result<Vec<String>>>;

/// Filesystem change reported by a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Add(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { recursive: true }
    }
}

/// Receives events from a watch subscription.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    async fn handle(&self, event: WatchEvent);
}

/// A live watch. Dropping or closing it stops event delivery.
#[async_trait]
pub trait WatchSubscription: Send {
    async fn close(self: Box<Self>);
}

/// File system access trait
///
/// Abstracts the disk operations the engine needs so reconciliation and
/// crawling logic can be exercised against fakes.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{AccessMode, FileSystemAccess};
///
/// async fn readable(fs: &dyn FileSystemAccess, path: &Path) -> bool {
///     fs.check_access(path, AccessMode::Read).await.unwrap_or(false)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Stat a path, following symlinks
    async fn stat(&self, path: &Path) -> Result<FileMetadata>;

    /// Check whether the path exists and grants the requested access
    async fn check_access(&self, path: &Path, mode: AccessMode) -> Result<bool>;

    /// Start a lazy traversal. Nothing is read until the stream is polled.
    fn walk(&self, options: CrawlOptions) -> PathBatches;

    /// Subscribe to changes under `paths`. Pre-existing entries are not reported.
    async fn watch(
        &self,
        paths: &[PathBuf],
        options: WatchOptions,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<Box<dyn WatchSubscription>>;
}

/// Integer counters keyed by string
///
/// Downstream metadata stages read these to learn when a directory's assets
/// have been fully processed. The engine only increments and reads them.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the counter and return the new value
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Current value, zero when the key was never written
    async fn get(&self, key: &str) -> Result<i64>;

    /// Remove the counter
    async fn reset(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_options_builder() {
        let options = CrawlOptions::new(CrawlMode::Files, vec![PathBuf::from("/data")])
            .with_extensions(vec!["jpg".to_string()])
            .with_exclusions(vec!["**/@eaDir/**".to_string()])
            .with_max_depth(1)
            .with_page_size(0);

        assert_eq!(options.mode, CrawlMode::Files);
        assert_eq!(options.max_depth, Some(1));
        assert_eq!(options.page_size, 1);
        assert!(!options.include_hidden);
        assert_eq!(options.extensions, vec!["jpg"]);
    }

    #[test]
    fn test_file_metadata() {
        let metadata = FileMetadata {
            size: 1024,
            created_at: Some(1234567890),
            modified_at: Some(1234567900),
            is_directory: false,
        };

        assert_eq!(metadata.size, 1024);
        assert!(!metadata.is_directory);
    }
}
