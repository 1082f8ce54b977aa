//! # Library Lifecycle
//!
//! Operator commands on libraries and the jobs that tear them down.
//!
//! ## Overview
//!
//! Creating a library validates nothing on disk; import paths are checked
//! lazily on the first scan. Updating import paths validates every new path
//! up front and rejects the update if any of them fails.
//!
//! Deleting is two-phase. The command soft-deletes the row and queues
//! `library-delete`. That job marks every asset deleted, streams the asset
//! ids in pages and queues one `asset-deletion` per asset. The library row is
//! only removed by a run that finds no assets left, and the periodic
//! `library-queue-cleanup` job re-queues `library-delete` for anything still
//! soft-deleted, so deletion converges.

use bridge_traits::ExclusionMatcher;
use core_library::{Directory, Library, LibraryStatistics};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::job::{
    AssetDeletion, AssetRemoval, Job, JobStatus, LibraryDelete, LibraryQueueScanAll,
    QueueSyncDirectories,
};
use crate::validator::ImportPathValidation;

/// Input of [`LibraryService::create`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLibrary {
    pub owner_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub import_paths: Vec<String>,
    /// Engine defaults apply when absent
    #[serde(default)]
    pub exclusion_patterns: Option<Vec<String>>,
}

/// Fields of [`LibraryService::update`]; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLibrary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub import_paths: Option<Vec<String>>,
    #[serde(default)]
    pub exclusion_patterns: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct LibraryService {
    ctx: SyncContext,
}

impl LibraryService {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn create(&self, request: CreateLibrary) -> Result<Library> {
        let exclusion_patterns = request
            .exclusion_patterns
            .unwrap_or_else(|| self.ctx.settings.default_exclusion_patterns.clone());
        check_patterns(&exclusion_patterns)?;

        let library = Library::new(
            request.owner_id,
            request
                .name
                .unwrap_or_else(|| Library::DEFAULT_NAME.to_string()),
            request.import_paths,
            exclusion_patterns,
            self.ctx.now(),
        );
        library.validate().map_err(SyncError::Validation)?;

        self.ctx.libraries.insert(&library).await?;
        info!(library_id = %library.id, name = %library.name, "Created library");
        Ok(library)
    }

    /// A live library, `NotFound` when missing or soft-deleted
    pub async fn get(&self, id: &str) -> Result<Library> {
        self.ctx
            .live_library(id)
            .await?
            .ok_or_else(|| SyncError::not_found("Library", id))
    }

    pub async fn get_all(&self) -> Result<Vec<Library>> {
        Ok(self.ctx.libraries.find_all(false).await?)
    }

    pub async fn update(&self, id: &str, request: UpdateLibrary) -> Result<Library> {
        let mut library = self.get(id).await?;

        if let Some(import_paths) = request.import_paths {
            let invalid = self
                .validate(&import_paths)
                .await
                .into_iter()
                .find(|validation| !validation.is_valid);
            if let Some(validation) = invalid {
                return Err(SyncError::Validation(format!(
                    "Invalid import path: {}",
                    validation.message.unwrap_or_default()
                )));
            }
            library.import_paths = import_paths;
        }

        if let Some(exclusion_patterns) = request.exclusion_patterns {
            check_patterns(&exclusion_patterns)?;
            library.exclusion_patterns = exclusion_patterns;
        }

        if let Some(name) = request.name {
            library.name = name;
        }

        library.validate().map_err(SyncError::Validation)?;
        library.updated_at = self.ctx.now();
        self.ctx.libraries.update(&library).await?;

        info!(library_id = %library.id, "Updated library");
        Ok(library)
    }

    /// Soft-delete the library and queue its teardown.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.get(id).await?;

        self.ctx.libraries.soft_delete(id, self.ctx.now()).await?;
        self.ctx
            .jobs
            .queue(Job::LibraryDelete(LibraryDelete { id: id.to_string() }))
            .await?;

        info!(library_id = id, "Library marked for deletion");
        Ok(())
    }

    pub async fn validate(&self, import_paths: &[String]) -> Vec<ImportPathValidation> {
        self.ctx.validator().validate_all(import_paths).await
    }

    pub async fn statistics(&self, id: &str) -> Result<LibraryStatistics> {
        self.ctx
            .libraries
            .statistics(id)
            .await?
            .ok_or_else(|| SyncError::not_found("Library", id))
    }

    /// Hide or show a directory; later scans keep whatever was chosen.
    pub async fn set_directory_hidden(&self, directory_id: &str, hidden: bool) -> Result<Directory> {
        let updated = self
            .ctx
            .directories
            .set_hidden(directory_id, hidden, self.ctx.now())
            .await?;
        if !updated {
            return Err(SyncError::not_found("Directory", directory_id));
        }

        info!(directory_id, hidden, "Directory visibility changed");
        self.ctx
            .directories
            .find_by_id(directory_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Directory", directory_id))
    }

    pub async fn queue_scan(&self, id: &str, force: bool) -> Result<()> {
        self.get(id).await?;

        info!(library_id = id, force, "Starting to scan library");
        self.ctx
            .jobs
            .queue(Job::QueueSyncDirectories(QueueSyncDirectories {
                library_id: id.to_string(),
                force,
            }))
            .await?;
        Ok(())
    }

    pub async fn queue_scan_all(&self, force: bool) -> Result<()> {
        info!(force, "Starting to scan all libraries");
        self.ctx
            .jobs
            .queue(Job::LibraryQueueScanAll(LibraryQueueScanAll { force }))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Job handlers
    // ========================================================================

    #[instrument(skip(self, job), fields(force = job.force))]
    pub async fn handle_queue_scan_all(&self, job: LibraryQueueScanAll) -> Result<JobStatus> {
        info!("Initiating scan of all libraries");
        self.ctx.jobs.queue(Job::LibraryQueueCleanup).await?;

        let libraries = self.ctx.libraries.find_all(false).await?;
        let jobs: Vec<Job> = libraries
            .iter()
            .map(|library| {
                Job::QueueSyncDirectories(QueueSyncDirectories {
                    library_id: library.id.clone(),
                    force: job.force,
                })
            })
            .collect();
        let count = jobs.len();
        self.ctx.jobs.queue_all(jobs).await?;

        info!(count, "Queued libraries for scan");
        Ok(JobStatus::Success)
    }

    #[instrument(skip(self))]
    pub async fn handle_queue_cleanup(&self) -> Result<JobStatus> {
        info!("Checking for libraries pending deletion");
        let pending = self.ctx.libraries.find_soft_deleted().await?;

        if !pending.is_empty() {
            info!(count = pending.len(), "Found libraries pending deletion, cleaning up");
            let jobs = pending
                .into_iter()
                .map(|library| Job::LibraryDelete(LibraryDelete { id: library.id }))
                .collect();
            self.ctx.jobs.queue_all(jobs).await?;
        }

        let purged = self.ctx.jobs.purge_finished().await?;
        debug!(purged, "Dropped expired job rows");

        Ok(JobStatus::Success)
    }

    #[instrument(skip(self, job), fields(library_id = %job.id))]
    pub async fn handle_library_delete(&self, job: LibraryDelete) -> Result<JobStatus> {
        let library_id = job.id;
        let marked = self
            .ctx
            .assets
            .mark_deleted_by_library(&library_id, self.ctx.now())
            .await?;
        debug!(marked, "Marked library assets deleted");

        let page_size = self.ctx.settings.page_size;
        let mut after: Option<String> = None;
        let mut queued = 0usize;

        loop {
            let ids = self
                .ctx
                .assets
                .page_ids_by_library(&library_id, after.as_deref(), page_size)
                .await?;
            let Some(last) = ids.last().cloned() else {
                break;
            };
            let page_len = ids.len();
            queued += page_len;

            debug!(count = page_len, "Queueing asset deletions");
            let jobs = ids
                .into_iter()
                .map(|id| Job::AssetDeletion(AssetDeletion { id }))
                .collect();
            self.ctx.jobs.queue_all(jobs).await?;

            if page_len < page_size {
                break;
            }
            after = Some(last);
        }

        if queued == 0 {
            info!("Deleting library");
            self.ctx.libraries.delete(&library_id).await?;
        }

        Ok(JobStatus::Success)
    }

    /// Drop assets whose file the watcher saw disappear.
    #[instrument(skip(self, job), fields(library_id = %job.library_id, count = job.paths.len()))]
    pub async fn handle_asset_removal(&self, job: AssetRemoval) -> Result<JobStatus> {
        let removed = self
            .ctx
            .assets
            .remove_by_paths(&job.library_id, &job.paths)
            .await?;
        debug!(removed, "Removed assets");
        Ok(JobStatus::Success)
    }

    /// Remove one asset row. Files on disk are never touched.
    #[instrument(skip(self, job), fields(asset_id = %job.id))]
    pub async fn handle_asset_deletion(&self, job: AssetDeletion) -> Result<JobStatus> {
        if !self.ctx.assets.delete(&job.id).await? {
            debug!("Asset already gone");
            return Ok(JobStatus::Skipped);
        }
        Ok(JobStatus::Success)
    }
}

fn check_patterns(patterns: &[String]) -> Result<()> {
    ExclusionMatcher::new(patterns)
        .map(|_| ())
        .map_err(|e| SyncError::Validation(format!("Invalid exclusion pattern: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QueueName;
    use crate::queue::JobQueue;
    use crate::test_support::Harness;
    use core_library::NewAsset;

    fn create(owner: &str, import_paths: Vec<String>) -> CreateLibrary {
        CreateLibrary {
            owner_id: owner.to_string(),
            import_paths,
            ..Default::default()
        }
    }

    async fn seed_assets(h: &Harness, library: &Library, count: usize) {
        let directory = h
            .ctx
            .directories
            .create_all(&library.id, &library.owner_id, &[h.path("2023")], 0)
            .await
            .unwrap()
            .remove(0);
        let assets: Vec<NewAsset> = (0..count)
            .map(|i| NewAsset {
                owner_id: library.owner_id.clone(),
                library_id: library.id.clone(),
                directory_id: directory.id.clone(),
                checksum: format!("sum-{}", i),
                original_path: h.path(&format!("2023/{}.jpg", i)),
                file_size: 1,
                file_modified_at: 1,
            })
            .collect();
        h.ctx.assets.create_all(&assets, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());

        let library = service
            .create(create("user-1", vec!["/does/not/exist".to_string()]))
            .await
            .unwrap();

        assert_eq!(library.name, Library::DEFAULT_NAME);
        assert_eq!(
            library.exclusion_patterns,
            h.ctx.settings.default_exclusion_patterns
        );
        // Paths are not checked until the first scan
        assert_eq!(library.import_paths, vec!["/does/not/exist".to_string()]);
        assert_eq!(service.get(&library.id).await.unwrap(), library);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_pattern_and_owner() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());

        let result = service
            .create(CreateLibrary {
                exclusion_patterns: Some(vec!["**/[".to_string()]),
                ..create("user-1", vec![])
            })
            .await;
        assert!(matches!(result, Err(SyncError::Validation(_))));

        let result = service.create(create("  ", vec![])).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_validates_new_import_paths() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let library = service.create(create("user-1", vec![])).await.unwrap();

        let err = service
            .update(
                &library.id,
                UpdateLibrary {
                    import_paths: Some(vec![h.root(), "relative/path".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        let SyncError::Validation(message) = err else {
            panic!("unexpected error {:?}", err);
        };
        assert!(message.starts_with("Invalid import path: Import path must be absolute"));
        assert!(service.get(&library.id).await.unwrap().import_paths.is_empty());

        let updated = service
            .update(
                &library.id,
                UpdateLibrary {
                    name: Some("Archive".to_string()),
                    import_paths: Some(vec![h.root()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Archive");
        assert_eq!(updated.import_paths, vec![h.root()]);
    }

    #[tokio::test]
    async fn test_deleted_library_is_not_found() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let library = service.create(create("user-1", vec![])).await.unwrap();

        service.delete(&library.id).await.unwrap();

        assert!(matches!(
            service.get(&library.id).await,
            Err(SyncError::NotFound { .. })
        ));
        assert!(service.get_all().await.unwrap().is_empty());
        assert!(matches!(
            service.queue_scan(&library.id, false).await,
            Err(SyncError::NotFound { .. })
        ));

        let jobs = h.waiting(QueueName::Library).await;
        assert_eq!(
            jobs,
            vec![Job::LibraryDelete(LibraryDelete {
                id: library.id.clone()
            })]
        );
    }

    #[tokio::test]
    async fn test_library_delete_converges() {
        let h = Harness::with_page_size(2).await;
        let service = LibraryService::new(h.ctx.clone());
        let library = h.library(vec![h.root()], vec![]).await;
        seed_assets(&h, &library, 3).await;
        service.delete(&library.id).await.unwrap();
        let delete = LibraryDelete {
            id: library.id.clone(),
        };

        service.handle_library_delete(delete.clone()).await.unwrap();
        let deletions: Vec<Job> = h
            .waiting(QueueName::Library)
            .await
            .into_iter()
            .filter(|job| matches!(job, Job::AssetDeletion(_)))
            .collect();
        assert_eq!(deletions.len(), 3);
        assert!(h.ctx.libraries.find_by_id(&library.id).await.unwrap().is_some());

        for job in deletions {
            let Job::AssetDeletion(job) = job else {
                unreachable!()
            };
            service.handle_asset_deletion(job).await.unwrap();
        }

        service.handle_library_delete(delete).await.unwrap();
        assert!(h.ctx.libraries.find_by_id(&library.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_requeues_soft_deleted() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let stuck = h.library(vec![], vec![]).await;
        h.library(vec![], vec![]).await;
        h.ctx.libraries.soft_delete(&stuck.id, 1).await.unwrap();

        service.handle_queue_cleanup().await.unwrap();

        assert_eq!(
            h.waiting(QueueName::Library).await,
            vec![Job::LibraryDelete(LibraryDelete { id: stuck.id })]
        );
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired_job_rows() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let library = h.library(vec![], vec![]).await;

        for _ in 0..3 {
            service.queue_scan(&library.id, true).await.unwrap();
            let record = h.queue.dequeue(QueueName::Library).await.unwrap().unwrap();
            h.queue.complete(record.id, JobStatus::Success).await.unwrap();
        }
        assert_eq!(h.queue.get_job_counts(QueueName::Library).await.unwrap().completed, 3);

        h.clock
            .advance_millis(h.config.job_retention.as_millis() as i64 + 1);
        service.handle_queue_cleanup().await.unwrap();

        let counts = h.queue.get_job_counts(QueueName::Library).await.unwrap();
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn test_scan_all_queues_cleanup_then_live_libraries() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let live = h.library(vec![], vec![]).await;
        let deleted = h.library(vec![], vec![]).await;
        h.ctx.libraries.soft_delete(&deleted.id, 1).await.unwrap();

        service
            .handle_queue_scan_all(LibraryQueueScanAll { force: true })
            .await
            .unwrap();

        assert_eq!(
            h.waiting(QueueName::Library).await,
            vec![
                Job::LibraryQueueCleanup,
                Job::QueueSyncDirectories(QueueSyncDirectories {
                    library_id: live.id,
                    force: true,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_asset_removal_by_path() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        let library = h.library(vec![h.root()], vec![]).await;
        seed_assets(&h, &library, 2).await;

        service
            .handle_asset_removal(AssetRemoval {
                library_id: library.id.clone(),
                paths: vec![h.path("2023/0.jpg"), h.path("2023/missing.jpg")],
            })
            .await
            .unwrap();

        assert_eq!(h.asset_count().await, 1);
        let stats = service.statistics(&library.id).await.unwrap();
        assert_eq!(stats.assets, 1);
    }

    #[tokio::test]
    async fn test_statistics_for_missing_library() {
        let h = Harness::new().await;
        let service = LibraryService::new(h.ctx.clone());
        assert!(matches!(
            service.statistics("missing").await,
            Err(SyncError::NotFound { .. })
        ));
        assert_eq!(
            h.queue
                .get_job_counts(QueueName::Library)
                .await
                .unwrap()
                .total(),
            0
        );
    }
}
