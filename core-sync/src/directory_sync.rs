//! # Directory Synchronizer
//!
//! Turns crawled directory paths into directory rows and schedules the
//! per-directory file crawl and reconciliation.
//!
//! ## Jobs
//!
//! - `queue-sync-directories`: crawl a library's valid import paths in
//!   directories mode and queue one `sync-directories` job per page of paths
//!   not yet registered. A forced run also re-offers every directory left in
//!   `added`, `failed` or `skipped` status.
//! - `sync-directories`: insert-or-ignore the paths, then queue
//!   `queue-sync-files` and `queue-sync-assets` for each directory.

use bridge_traits::{CrawlMode, CrawlOptions};
use core_library::DirectoryStatus;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

use crate::context::SyncContext;
use crate::error::Result;
use crate::job::{
    Job, JobStatus, QueueSyncAssets, QueueSyncDirectories, QueueSyncFiles, SyncDirectories,
};

pub struct DirectorySynchronizer {
    ctx: SyncContext,
}

impl DirectorySynchronizer {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, job), fields(library_id = %job.library_id, force = job.force))]
    pub async fn handle_queue_sync_directories(
        &self,
        job: QueueSyncDirectories,
    ) -> Result<JobStatus> {
        let Some(library) = self.ctx.live_library(&job.library_id).await? else {
            debug!("Library not found or deleted, skipping directory import");
            return Ok(JobStatus::Skipped);
        };

        let validator = self.ctx.validator();
        let mut roots = Vec::new();
        for validation in validator.validate_all(&library.import_paths).await {
            if validation.is_valid {
                roots.push(PathBuf::from(&validation.import_path));
            } else {
                warn!(
                    import_path = %validation.import_path,
                    reason = ?validation.message,
                    "Skipping invalid import path"
                );
            }
        }

        if roots.is_empty() {
            warn!("No valid import paths found");
            return Ok(JobStatus::Skipped);
        }

        let options = CrawlOptions::new(CrawlMode::Directories, roots)
            .with_exclusions(library.exclusion_patterns.clone())
            .with_extensions(self.ctx.settings.supported_extensions.clone())
            .with_page_size(self.ctx.settings.page_size);
        let mut pages = self.ctx.fs.walk(options);

        let mut crawl_count: u64 = 0;
        let mut import_count: u64 = 0;

        while let Some(page) = pages.next().await {
            let page = page?;
            crawl_count += page.len() as u64;

            let directories = self
                .ctx
                .directories
                .filter_new_paths(&library.id, &page)
                .await?;

            if !directories.is_empty() {
                import_count += directories.len() as u64;
                self.ctx
                    .jobs
                    .queue(Job::SyncDirectories(SyncDirectories {
                        library_id: library.id.clone(),
                        directories,
                        progress_counter: crawl_count,
                        total_directories: None,
                        force: job.force,
                    }))
                    .await?;
            }

            debug!(crawl_count, page_len = page.len(), "Crawled directory page");
        }

        if job.force {
            let unprocessed: Vec<String> = self
                .ctx
                .directories
                .find_by_status(&library.id, &DirectoryStatus::unprocessed())
                .await?
                .into_iter()
                .map(|directory| directory.path)
                .collect();

            if !unprocessed.is_empty() {
                debug!(count = unprocessed.len(), "Re-offering unprocessed directories");
                import_count += unprocessed.len() as u64;

                let jobs = unprocessed
                    .chunks(self.ctx.settings.page_size)
                    .map(|chunk| {
                        Job::SyncDirectories(SyncDirectories {
                            library_id: library.id.clone(),
                            directories: chunk.to_vec(),
                            progress_counter: crawl_count,
                            total_directories: None,
                            force: true,
                        })
                    })
                    .collect();
                self.ctx.jobs.queue_all(jobs).await?;
            }
        }

        self.ctx
            .libraries
            .set_refreshed_at(&library.id, self.ctx.now())
            .await?;

        info!(crawl_count, import_count, "Finished directory crawl");
        Ok(JobStatus::Success)
    }

    #[instrument(
        skip(self, job),
        fields(library_id = %job.library_id, count = job.directories.len(), force = job.force)
    )]
    pub async fn handle_sync_directories(&self, job: SyncDirectories) -> Result<JobStatus> {
        let Some(library) = self.ctx.live_library(&job.library_id).await? else {
            debug!("Library not found or deleted, dropping directory batch");
            return Ok(JobStatus::Failed);
        };

        let now = self.ctx.now();
        let created = self
            .ctx
            .directories
            .create_all(&library.id, &library.owner_id, &job.directories, now)
            .await?;

        let mut seen = HashSet::new();
        let mut directory_ids: Vec<String> = created
            .into_iter()
            .map(|directory| directory.id)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let inserted = directory_ids.len();

        if job.force {
            let existing = self
                .ctx
                .directories
                .find_by_paths(&library.id, &job.directories)
                .await?;
            directory_ids.extend(
                existing
                    .into_iter()
                    .map(|directory| directory.id)
                    .filter(|id| seen.insert(id.clone())),
            );
        }

        if directory_ids.is_empty() {
            return Ok(JobStatus::Success);
        }

        let jobs = directory_ids
            .iter()
            .flat_map(|id| {
                [
                    Job::QueueSyncFiles(QueueSyncFiles {
                        directory_id: id.clone(),
                        force: job.force,
                    }),
                    Job::QueueSyncAssets(QueueSyncAssets {
                        directory_id: id.clone(),
                    }),
                ]
            })
            .collect();
        self.ctx.jobs.queue_all(jobs).await?;

        self.ctx
            .directories
            .update_status(&directory_ids, DirectoryStatus::Queued, now)
            .await?;

        let progress = match job.total_directories {
            Some(total) => format!("{} of {}", job.progress_counter, total),
            None => format!("{} done so far", job.progress_counter),
        };
        info!(
            inserted,
            queued = directory_ids.len(),
            progress = %progress,
            "Imported directories"
        );
        Ok(JobStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QueueName;
    use crate::lifecycle::LibraryService;
    use crate::test_support::Harness;

    fn queue_sync(library_id: &str, force: bool) -> QueueSyncDirectories {
        QueueSyncDirectories {
            library_id: library_id.to_string(),
            force,
        }
    }

    #[tokio::test]
    async fn test_crawl_queues_new_directories() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        h.touch("2023/b.jpg").await;
        h.touch("2024/trip/c.heic").await;
        let library = h.library(vec![h.root()], vec![]).await;

        let sync = DirectorySynchronizer::new(h.ctx.clone());
        let status = sync
            .handle_queue_sync_directories(queue_sync(&library.id, false))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Success);

        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(jobs.len(), 1);
        let Job::SyncDirectories(batch) = &jobs[0] else {
            panic!("unexpected job {:?}", jobs[0]);
        };
        let mut directories = batch.directories.clone();
        directories.sort();
        assert_eq!(
            directories,
            vec![h.path("2023"), h.path("2024"), h.path("2024/trip")]
        );
        assert_eq!(batch.progress_counter, 3);

        let refreshed = h.ctx.libraries.find_by_id(&library.id).await.unwrap().unwrap();
        assert!(refreshed.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_or_deleted_library_is_skipped() {
        let h = Harness::new().await;
        let sync = DirectorySynchronizer::new(h.ctx.clone());

        let status = sync
            .handle_queue_sync_directories(queue_sync("missing", false))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Skipped);

        let library = h.library(vec![h.root()], vec![]).await;
        h.ctx.libraries.soft_delete(&library.id, 1).await.unwrap();
        let status = sync
            .handle_sync_directories(SyncDirectories {
                library_id: library.id.clone(),
                directories: vec![h.path("2023")],
                progress_counter: 1,
                total_directories: None,
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert!(h.waiting(QueueName::Library).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_valid_import_path_is_skipped() {
        let h = Harness::new().await;
        let library = h
            .library(vec![format!("{}/missing", h.root())], vec![])
            .await;

        let status = DirectorySynchronizer::new(h.ctx.clone())
            .handle_queue_sync_directories(queue_sync(&library.id, false))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Skipped);
    }

    #[tokio::test]
    async fn test_sync_directories_queues_follow_up_jobs() {
        let h = Harness::new().await;
        let library = h.library(vec![h.root()], vec![]).await;
        let sync = DirectorySynchronizer::new(h.ctx.clone());

        let batch = SyncDirectories {
            library_id: library.id.clone(),
            directories: vec![h.path("2023"), h.path("2024")],
            progress_counter: 2,
            total_directories: Some(2),
            force: false,
        };
        sync.handle_sync_directories(batch.clone()).await.unwrap();

        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(jobs.len(), 4);
        assert!(matches!(jobs[0], Job::QueueSyncFiles(_)));
        assert!(matches!(jobs[1], Job::QueueSyncAssets(_)));

        let queued = h
            .ctx
            .directories
            .find_by_status(&library.id, &[DirectoryStatus::Queued])
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);

        // Re-running the same batch inserts nothing and queues nothing
        sync.handle_sync_directories(batch.clone()).await.unwrap();
        assert_eq!(h.waiting(QueueName::Library).await.len(), 4);

        // Forcing it re-queues the existing directories
        sync.handle_sync_directories(SyncDirectories {
            force: true,
            ..batch
        })
        .await
        .unwrap();
        assert_eq!(h.waiting(QueueName::Library).await.len(), 8);
    }

    #[tokio::test]
    async fn test_forced_resync_keeps_hidden_directory_hidden() {
        let h = Harness::new().await;
        let library = h.library(vec![h.root()], vec![]).await;
        let sync = DirectorySynchronizer::new(h.ctx.clone());
        let batch = SyncDirectories {
            library_id: library.id.clone(),
            directories: vec![h.path("2023")],
            progress_counter: 1,
            total_directories: Some(1),
            force: false,
        };
        sync.handle_sync_directories(batch.clone()).await.unwrap();

        let directory = h
            .ctx
            .directories
            .find_by_path(&library.id, &h.path("2023"))
            .await
            .unwrap()
            .unwrap();
        let hidden = LibraryService::new(h.ctx.clone())
            .set_directory_hidden(&directory.id, true)
            .await
            .unwrap();
        assert!(hidden.is_hidden);

        sync.handle_sync_directories(SyncDirectories {
            force: true,
            ..batch
        })
        .await
        .unwrap();

        let after = h.ctx.directories.find_by_id(&directory.id).await.unwrap().unwrap();
        assert!(after.is_hidden);
        assert_eq!(after.status, DirectoryStatus::Queued);
    }

    #[tokio::test]
    async fn test_force_reoffers_unprocessed_directories() {
        let h = Harness::new().await;
        h.touch("2023/a.jpg").await;
        let library = h.library(vec![h.root()], vec![]).await;
        h.ctx
            .directories
            .create_all(&library.id, &library.owner_id, &[h.path("2023")], 0)
            .await
            .unwrap();

        let sync = DirectorySynchronizer::new(h.ctx.clone());
        sync.handle_queue_sync_directories(queue_sync(&library.id, true))
            .await
            .unwrap();

        // The crawl finds nothing new, the re-offer carries the added directory
        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(jobs.len(), 1);
        let Job::SyncDirectories(batch) = &jobs[0] else {
            panic!("unexpected job {:?}", jobs[0]);
        };
        assert_eq!(batch.directories, vec![h.path("2023")]);
        assert!(batch.force);
    }
}
