//! # File Synchronizer
//!
//! Turns crawled file paths of one directory into asset rows.
//!
//! ## Jobs
//!
//! - `queue-sync-files`: re-validate the directory, crawl its direct children
//!   and queue `sync-files` per page of paths with no asset yet. A forced run
//!   offers every crawled path, then carries forward known asset paths the
//!   crawl no longer saw so they are looked at again.
//! - `sync-files`: stat each path, fingerprint it, insert the new rows in
//!   chunks, attach them to the directory's album (creating it once) and
//!   queue post-sync discovery for every asset touched.
//!
//! ## Fingerprints
//!
//! An asset's checksum is SHA-256 over `path:<normalized path>`, so it names a
//! location rather than content and stays stable across edits of the file.

use bridge_traits::paths::{base_name, normalize_path};
use bridge_traits::{CrawlMode, CrawlOptions};
use core_library::{Album, AlbumId, Directory, DirectoryStatus, Library, NewAsset};
use futures::future::join_all;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::context::SyncContext;
use crate::error::Result;
use crate::job::{Job, JobStatus, QueueSyncFiles, SidecarDiscovery, SyncFiles};

/// Stable dedup key of a library file.
pub fn fingerprint(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("path:{}", normalize_path(path)).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Counter downstream stages read to learn how many assets of a directory
/// still await discovery.
pub fn pending_sidecar_key(directory_id: &str) -> String {
    format!("pending-sidecar:{}", directory_id)
}

/// Bump the directory's pending counter and queue one discovery job per asset.
pub async fn queue_post_sync_jobs(
    ctx: &SyncContext,
    asset_ids: &[String],
    directory_id: &str,
) -> Result<()> {
    if asset_ids.is_empty() {
        return Ok(());
    }

    ctx.counters
        .increment(&pending_sidecar_key(directory_id), asset_ids.len() as i64)
        .await?;

    let jobs = asset_ids
        .iter()
        .map(|id| {
            Job::SidecarDiscovery(SidecarDiscovery {
                id: id.clone(),
                directory_id: directory_id.to_string(),
            })
        })
        .collect();
    ctx.jobs.queue_all(jobs).await?;

    debug!(
        directory_id,
        count = asset_ids.len(),
        "Queued sidecar discovery"
    );
    Ok(())
}

pub struct FileSynchronizer {
    ctx: SyncContext,
}

impl FileSynchronizer {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, job), fields(directory_id = %job.directory_id, force = job.force))]
    pub async fn handle_queue_sync_files(&self, job: QueueSyncFiles) -> Result<JobStatus> {
        let Some(directory) = self.ctx.directories.find_by_id(&job.directory_id).await? else {
            debug!("Directory not found, skipping file crawl");
            return Ok(JobStatus::Skipped);
        };

        let Some(library) = self.ctx.live_library(&directory.library_id).await? else {
            debug!(library_id = %directory.library_id, "Library not found or deleted, skipping file crawl");
            return Ok(JobStatus::Skipped);
        };

        let ids = [directory.id.clone()];
        self.ctx
            .directories
            .update_status(&ids, DirectoryStatus::Processing, self.ctx.now())
            .await?;

        match self.crawl_directory(&library, &directory, job.force).await {
            Ok(status) => {
                let final_status = match status {
                    JobStatus::Skipped => DirectoryStatus::Skipped,
                    _ => DirectoryStatus::Done,
                };
                self.ctx
                    .directories
                    .update_status(&ids, final_status, self.ctx.now())
                    .await?;
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, "File crawl failed");
                if let Err(update_err) = self
                    .ctx
                    .directories
                    .update_status(&ids, DirectoryStatus::Failed, self.ctx.now())
                    .await
                {
                    warn!(error = %update_err, "Failed to mark directory failed");
                }
                Err(e)
            }
        }
    }

    async fn crawl_directory(
        &self,
        library: &Library,
        directory: &Directory,
        force: bool,
    ) -> Result<JobStatus> {
        let validation = self.ctx.validator().validate(&directory.path).await;
        if !validation.is_valid {
            warn!(
                path = %directory.path,
                reason = ?validation.message,
                "Directory path is no longer valid"
            );
            self.ctx
                .directories
                .set_offline(&directory.id, true, self.ctx.now())
                .await?;
            return Ok(JobStatus::Skipped);
        }

        if directory.is_offline {
            self.ctx
                .directories
                .set_offline(&directory.id, false, self.ctx.now())
                .await?;
        }

        let options = CrawlOptions::new(CrawlMode::Files, vec![PathBuf::from(&directory.path)])
            .with_exclusions(library.exclusion_patterns.clone())
            .with_extensions(self.ctx.settings.supported_extensions.clone())
            .with_max_depth(1)
            .with_page_size(self.ctx.settings.page_size);
        let mut pages = self.ctx.fs.walk(options);

        let mut crawl_count: u64 = 0;
        let mut import_count: u64 = 0;
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(page) = pages.next().await {
            let page = page?;
            crawl_count += page.len() as u64;

            let paths = if force {
                page.iter()
                    .map(normalize_path)
                    .filter(|path| seen.insert(path.clone()))
                    .collect()
            } else {
                self.ctx
                    .assets
                    .filter_new_paths_by_directory(&directory.id, &page)
                    .await?
            };

            if !paths.is_empty() {
                import_count += paths.len() as u64;
                self.ctx
                    .jobs
                    .queue(self.sync_files_job(library, directory, paths, crawl_count, force))
                    .await?;
            }
        }

        if force {
            let carried: Vec<String> = self
                .ctx
                .assets
                .find_paths_by_directory(&directory.id)
                .await?
                .into_iter()
                .filter(|path| !seen.contains(path))
                .collect();

            if !carried.is_empty() {
                debug!(count = carried.len(), "Carrying forward assets missing from crawl");
                import_count += carried.len() as u64;
                let jobs = carried
                    .chunks(self.ctx.settings.page_size)
                    .map(|chunk| {
                        self.sync_files_job(library, directory, chunk.to_vec(), crawl_count, true)
                    })
                    .collect();
                self.ctx.jobs.queue_all(jobs).await?;
            }
        }

        self.ctx
            .libraries
            .set_refreshed_at(&library.id, self.ctx.now())
            .await?;

        info!(crawl_count, import_count, "Finished file crawl");
        Ok(JobStatus::Success)
    }

    fn sync_files_job(
        &self,
        library: &Library,
        directory: &Directory,
        paths: Vec<String>,
        progress_counter: u64,
        force: bool,
    ) -> Job {
        Job::SyncFiles(SyncFiles {
            library_id: library.id.clone(),
            directory_id: directory.id.clone(),
            paths,
            progress_counter,
            total_assets: None,
            force,
        })
    }

    #[instrument(
        skip(self, job),
        fields(directory_id = %job.directory_id, count = job.paths.len(), force = job.force)
    )]
    pub async fn handle_sync_files(&self, job: SyncFiles) -> Result<JobStatus> {
        let Some(directory) = self.ctx.directories.find_by_id(&job.directory_id).await? else {
            debug!("Directory not found, skipping file import");
            return Ok(JobStatus::Failed);
        };

        let Some(library) = self.ctx.live_library(&job.library_id).await? else {
            warn!(library_id = %job.library_id, "Library not found or deleted, won't import assets into it");
            return Ok(JobStatus::Failed);
        };

        let mut candidates = self.build_candidates(&library, &directory, &job.paths).await;

        let mut existing_ids = Vec::new();
        if job.force && !candidates.is_empty() {
            let checksums: Vec<String> = candidates.iter().map(|c| c.checksum.clone()).collect();
            let existing = self
                .ctx
                .assets
                .find_by_checksums(&library.id, &checksums)
                .await?;
            let known: HashSet<&str> = existing.iter().map(|a| a.checksum.as_str()).collect();
            candidates.retain(|candidate| !known.contains(candidate.checksum.as_str()));
            existing_ids = existing.iter().map(|a| a.id.clone()).collect();
        }

        let now = self.ctx.now();
        let created = self.ctx.assets.create_all(&candidates, now).await?;
        let mut asset_ids: Vec<String> = created.into_iter().map(|asset| asset.id).collect();
        let inserted = asset_ids.len();

        let mut seen: HashSet<String> = asset_ids.iter().cloned().collect();
        asset_ids.extend(existing_ids.into_iter().filter(|id| seen.insert(id.clone())));

        self.attach_to_album(&library, &directory, &asset_ids, now)
            .await?;

        let progress = match job.total_assets {
            Some(total) => format!("{} of {}", job.progress_counter, total),
            None => format!("{} done so far", job.progress_counter),
        };
        info!(
            inserted,
            touched = asset_ids.len(),
            progress = %progress,
            "Imported files"
        );

        queue_post_sync_jobs(&self.ctx, &asset_ids, &directory.id).await?;
        Ok(JobStatus::Success)
    }

    /// Candidate rows for every path that can be stat'ed as a file.
    async fn build_candidates(
        &self,
        library: &Library,
        directory: &Directory,
        paths: &[String],
    ) -> Vec<NewAsset> {
        let mut seen = HashSet::new();
        let paths: Vec<String> = paths
            .iter()
            .map(normalize_path)
            .filter(|path| seen.insert(path.clone()))
            .collect();

        let stats = join_all(paths.iter().map(|path| self.ctx.fs.stat(Path::new(path)))).await;

        paths
            .into_iter()
            .zip(stats)
            .filter_map(|(path, stat)| match stat {
                Ok(metadata) if !metadata.is_directory => Some(NewAsset {
                    owner_id: library.owner_id.clone(),
                    library_id: library.id.clone(),
                    directory_id: directory.id.clone(),
                    checksum: fingerprint(&path),
                    file_size: metadata.size as i64,
                    file_modified_at: metadata.modified_at.unwrap_or(0),
                    original_path: path,
                }),
                Ok(_) => {
                    debug!(path = %path, "Skipping directory offered as file");
                    None
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to stat file, skipping");
                    None
                }
            })
            .collect()
    }

    /// Add assets to the directory's album, creating and linking it the first time.
    async fn attach_to_album(
        &self,
        library: &Library,
        directory: &Directory,
        asset_ids: &[String],
        now: i64,
    ) -> Result<()> {
        if let Some(album_id) = &directory.album_id {
            self.ctx.albums.add_assets(album_id, asset_ids, now).await?;
            return Ok(());
        }

        let name = base_name(&directory.path);
        let album = Album {
            id: AlbumId::new().to_string(),
            owner_id: library.owner_id.clone(),
            description: Some(format!("Auto-generated album for {}", name)),
            name,
            created_at: now,
            updated_at: now,
        };
        self.ctx.albums.create(&album, asset_ids).await?;

        if self
            .ctx
            .directories
            .link_album(&directory.id, &album.id, now)
            .await?
        {
            info!(album_id = %album.id, name = %album.name, "Created directory album");
            return Ok(());
        }

        // Another batch of the same directory linked its album first.
        self.ctx.albums.delete(&album.id).await?;
        let linked = self
            .ctx
            .directories
            .find_by_id(&directory.id)
            .await?
            .and_then(|d| d.album_id);
        if let Some(album_id) = linked {
            self.ctx.albums.add_assets(&album_id, asset_ids, now).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QueueName;
    use crate::test_support::Harness;
    use bridge_traits::CounterStore;

    #[test]
    fn test_fingerprint_is_stable_and_normalized() {
        let a = fingerprint("/data/photos/a.jpg");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("/data/photos/./a.jpg"));
        assert_ne!(a, fingerprint("/data/photos/b.jpg"));
    }

    async fn directory(h: &Harness, library: &Library, rel: &str) -> Directory {
        h.ctx
            .directories
            .create_all(&library.id, &library.owner_id, &[h.path(rel)], 0)
            .await
            .unwrap()
            .remove(0)
    }

    fn sync_files(library: &Library, directory: &Directory, paths: Vec<String>) -> SyncFiles {
        SyncFiles {
            library_id: library.id.clone(),
            directory_id: directory.id.clone(),
            paths,
            progress_counter: 1,
            total_assets: None,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_queue_sync_files_crawls_direct_children_only() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        h.touch("2023/notes.txt").await;
        h.touch("2023/nested/b.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;

        let sync = FileSynchronizer::new(h.ctx.clone());
        let status = sync
            .handle_queue_sync_files(QueueSyncFiles {
                directory_id: dir.id.clone(),
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Success);

        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(jobs.len(), 1);
        let Job::SyncFiles(batch) = &jobs[0] else {
            panic!("unexpected job {:?}", jobs[0]);
        };
        assert_eq!(batch.paths, vec![h.path("2023/a.jpg")]);

        let dir = h.ctx.directories.find_by_id(&dir.id).await.unwrap().unwrap();
        assert_eq!(dir.status, DirectoryStatus::Done);
    }

    #[tokio::test]
    async fn test_queue_sync_files_skips_vanished_directory() {
        let h = Harness::new().await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "gone").await;

        let status = FileSynchronizer::new(h.ctx.clone())
            .handle_queue_sync_files(QueueSyncFiles {
                directory_id: dir.id.clone(),
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Skipped);

        let dir = h.ctx.directories.find_by_id(&dir.id).await.unwrap().unwrap();
        assert_eq!(dir.status, DirectoryStatus::Skipped);
        assert!(dir.is_offline);

        // Reappearing clears the offline flag
        h.touch("gone/a.jpg").await;
        FileSynchronizer::new(h.ctx.clone())
            .handle_queue_sync_files(QueueSyncFiles {
                directory_id: dir.id.clone(),
                force: false,
            })
            .await
            .unwrap();
        let dir = h.ctx.directories.find_by_id(&dir.id).await.unwrap().unwrap();
        assert!(!dir.is_offline);
        assert_eq!(dir.status, DirectoryStatus::Done);
    }

    #[tokio::test]
    async fn test_sync_files_inserts_assets_and_creates_album() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        h.touch("2023/b.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;

        let sync = FileSynchronizer::new(h.ctx.clone());
        let paths = vec![
            h.path("2023/a.jpg"),
            h.path("2023/b.jpg"),
            h.path("2023/missing.jpg"),
        ];
        let status = sync
            .handle_sync_files(sync_files(&library, &dir, paths))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Success);

        let dir = h.ctx.directories.find_by_id(&dir.id).await.unwrap().unwrap();
        let album_id = dir.album_id.clone().expect("album linked");
        let album = h.ctx.albums.find_by_id(&album_id).await.unwrap().unwrap();
        assert_eq!(album.name, "2023");
        assert_eq!(
            album.description.as_deref(),
            Some("Auto-generated album for 2023")
        );
        assert_eq!(h.ctx.albums.asset_ids(&album_id).await.unwrap().len(), 2);

        let discovery = h.waiting(QueueName::Discovery).await;
        assert_eq!(discovery.len(), 2);
        assert_eq!(
            h.ctx
                .counters
                .get(&pending_sidecar_key(&dir.id))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_later_batches_grow_existing_album() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        h.touch("2023/b.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;
        let sync = FileSynchronizer::new(h.ctx.clone());

        sync.handle_sync_files(sync_files(&library, &dir, vec![h.path("2023/a.jpg")]))
            .await
            .unwrap();
        sync.handle_sync_files(sync_files(&library, &dir, vec![h.path("2023/b.jpg")]))
            .await
            .unwrap();

        let dir = h.ctx.directories.find_by_id(&dir.id).await.unwrap().unwrap();
        let album_id = dir.album_id.unwrap();
        assert_eq!(h.ctx.albums.asset_ids(&album_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_force_does_not_reinsert_known_files() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;
        let sync = FileSynchronizer::new(h.ctx.clone());

        sync.handle_sync_files(sync_files(&library, &dir, vec![h.path("2023/a.jpg")]))
            .await
            .unwrap();
        sync.handle_sync_files(SyncFiles {
            force: true,
            ..sync_files(&library, &dir, vec![h.path("2023/a.jpg")])
        })
        .await
        .unwrap();

        let stats = h.ctx.libraries.statistics(&library.id).await.unwrap().unwrap();
        assert_eq!(stats.assets, 1);
        // The known asset is offered to discovery again
        assert_eq!(h.waiting(QueueName::Discovery).await.len(), 2);
    }

    #[tokio::test]
    async fn test_force_crawl_carries_forward_missing_assets() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        h.touch("2023/b.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;
        let sync = FileSynchronizer::new(h.ctx.clone());

        sync.handle_sync_files(sync_files(
            &library,
            &dir,
            vec![h.path("2023/a.jpg"), h.path("2023/b.jpg")],
        ))
        .await
        .unwrap();
        tokio::fs::remove_file(h.path("2023/b.jpg")).await.unwrap();

        sync.handle_queue_sync_files(QueueSyncFiles {
            directory_id: dir.id.clone(),
            force: true,
        })
        .await
        .unwrap();

        let mut offered: Vec<String> = h
            .waiting(QueueName::Library)
            .await
            .into_iter()
            .filter_map(|job| match job {
                Job::SyncFiles(batch) => Some(batch.paths),
                _ => None,
            })
            .flatten()
            .collect();
        offered.sort();
        assert_eq!(offered, vec![h.path("2023/a.jpg"), h.path("2023/b.jpg")]);
    }

    #[tokio::test]
    async fn test_sync_files_for_deleted_library_fails() {
        let h = Harness::new().await;
        let library = h.library(vec![h.root()], vec![]).await;
        let dir = directory(&h, &library, "2023").await;
        h.ctx.libraries.soft_delete(&library.id, 5).await.unwrap();

        let status = FileSynchronizer::new(h.ctx.clone())
            .handle_sync_files(sync_files(&library, &dir, vec![h.path("2023/a.jpg")]))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
    }
}
