//! Worklist disk crawler
//!
//! Traverses one or more roots with an explicit stack of pending directories
//! and hands results out one page at a time. The open `ReadDir` handle is part
//! of the crawler state, so a page can end in the middle of a directory and the
//! next page resumes from there.

use bridge_traits::{
    error::Result,
    matcher::{ExclusionMatcher, ExtensionFilter},
    paths::normalize_path,
    storage::{CrawlMode, CrawlOptions, PathBatches},
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace, warn};

struct PendingDir {
    path: PathBuf,
    depth: usize,
    is_root: bool,
}

struct OpenDir {
    path: PathBuf,
    depth: usize,
    is_root: bool,
    entries: fs::ReadDir,
    has_files: bool,
}

/// Lazy, paginated traversal over local directories.
pub struct DiskCrawler {
    mode: CrawlMode,
    exclusions: ExclusionMatcher,
    extensions: ExtensionFilter,
    include_hidden: bool,
    max_depth: Option<usize>,
    page_size: usize,
    pending: Vec<PendingDir>,
    visited: HashSet<PathBuf>,
    current: Option<OpenDir>,
}

impl DiskCrawler {
    pub fn new(options: CrawlOptions) -> Result<Self> {
        let exclusions = ExclusionMatcher::new(&options.exclusion_patterns)?;

        let mut pending = Vec::with_capacity(options.roots.len());
        // Reversed so the first root is traversed first.
        for root in options.roots.iter().rev() {
            let root = normalize_path(root);
            if exclusions.is_dir_excluded(&root) {
                debug!(root = %root, "Skipping excluded crawl root");
                continue;
            }
            pending.push(PendingDir {
                path: PathBuf::from(root),
                depth: 0,
                is_root: true,
            });
        }

        Ok(Self {
            mode: options.mode,
            exclusions,
            extensions: ExtensionFilter::new(&options.extensions),
            include_hidden: options.include_hidden,
            max_depth: options.max_depth,
            page_size: options.page_size.max(1),
            pending,
            visited: HashSet::new(),
            current: None,
        })
    }

    /// Start a crawl, reporting invalid options as the first stream item.
    pub fn stream(options: CrawlOptions) -> PathBatches {
        match Self::new(options) {
            Ok(crawler) => crawler.into_stream(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    pub fn into_stream(self) -> PathBatches {
        stream::unfold(Some(self), |state| async move {
            let mut crawler = state?;
            match crawler.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(crawler))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    /// Produce the next page, or `None` once every root is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        let mut page = Vec::new();

        while page.len() < self.page_size {
            let mut dir = match self.current.take() {
                Some(dir) => dir,
                None => match self.open_next().await {
                    Some(dir) => dir,
                    None => break,
                },
            };

            match dir.entries.next_entry().await {
                Ok(Some(entry)) => {
                    self.visit_entry(&mut dir, entry, &mut page).await;
                    self.current = Some(dir);
                }
                Ok(None) => self.finish_dir(dir, &mut page),
                Err(e) => {
                    warn!(path = %dir.path.display(), error = %e, "Failed to read directory entry");
                }
            }
        }

        if page.is_empty() {
            Ok(None)
        } else {
            trace!(count = page.len(), "Crawl page ready");
            Ok(Some(page))
        }
    }

    async fn open_next(&mut self) -> Option<OpenDir> {
        while let Some(next) = self.pending.pop() {
            // Subdirectories are recorded when discovered; roots when opened.
            if next.is_root && !self.mark_visited(&next.path).await {
                debug!(path = %next.path.display(), "Directory already visited, skipping");
                continue;
            }

            match fs::read_dir(&next.path).await {
                Ok(entries) => {
                    return Some(OpenDir {
                        path: next.path,
                        depth: next.depth,
                        is_root: next.is_root,
                        entries,
                        has_files: false,
                    })
                }
                Err(e) => {
                    warn!(path = %next.path.display(), error = %e, "Failed to open directory");
                }
            }
        }
        None
    }

    async fn visit_entry(&mut self, dir: &mut OpenDir, entry: fs::DirEntry, page: &mut Vec<String>) {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(parent = %dir.path.display(), "Skipping entry with non UTF-8 name");
            return;
        };

        if !self.include_hidden && name.starts_with('.') {
            return;
        }

        let path = dir.path.join(name);
        let path_str = path.to_string_lossy().into_owned();

        let (is_dir, is_file) = match entry.file_type().await {
            Ok(ft) if ft.is_symlink() => match fs::metadata(&path).await {
                Ok(meta) => (meta.is_dir(), meta.is_file()),
                Err(_) => {
                    trace!(path = %path_str, "Skipping dangling symlink");
                    return;
                }
            },
            Ok(ft) => (ft.is_dir(), ft.is_file()),
            Err(e) => {
                warn!(path = %path_str, error = %e, "Failed to read entry type");
                return;
            }
        };

        let depth = dir.depth + 1;
        let within_depth = self.max_depth.map_or(true, |max| depth <= max);

        if is_dir {
            if self.exclusions.is_dir_excluded(&path_str) {
                trace!(path = %path_str, "Excluded directory not descended");
                return;
            }
            if !within_depth {
                return;
            }
            if !self.mark_visited(&path).await {
                debug!(path = %path_str, "Directory already visited, skipping");
                return;
            }
            if self.mode == CrawlMode::Directories {
                page.push(path_str);
            }
            if self.max_depth.map_or(true, |max| depth < max) {
                self.pending.push(PendingDir {
                    path,
                    depth,
                    is_root: false,
                });
            }
        } else if is_file {
            if !self.extensions.accepts(&path) || self.exclusions.is_match(&path_str) {
                return;
            }
            match self.mode {
                CrawlMode::Files if within_depth => page.push(path_str),
                CrawlMode::Files => {}
                CrawlMode::Directories => dir.has_files = true,
            }
        }
    }

    /// Records the resolved target of `path`; false if it was already seen.
    async fn mark_visited(&mut self, path: &Path) -> bool {
        let canonical = fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        self.visited.insert(canonical)
    }

    fn finish_dir(&mut self, dir: OpenDir, page: &mut Vec<String>) {
        // Roots are only reported as directories when they hold files themselves.
        if self.mode == CrawlMode::Directories && dir.is_root && dir.has_files {
            page.push(dir.path.to_string_lossy().into_owned());
        }
    }
}
