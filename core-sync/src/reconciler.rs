//! # Asset Reconciler
//!
//! Compares registered assets against the disk and flips them offline or
//! back online.
//!
//! ## Two passes
//!
//! `queue-sync-assets` first runs one set-based update in the database that
//! takes assets offline when their path left every import path or matches an
//! exclusion pattern. That pass only ever goes online → offline. It then pages
//! through the directory's asset ids and queues `sync-assets` per page.
//!
//! `sync-assets` stats every asset of its page concurrently and classifies
//! each one with [`classify`]:
//!
//! | Disk      | Asset                       | Action          |
//! |-----------|-----------------------------|-----------------|
//! | missing   | online                      | `Offline`       |
//! | missing   | offline                     | `DoNothing`     |
//! | present   | offline, not deleted        | `CheckOffline`  |
//! | present   | mtime differs               | `Update`        |
//! | present   | mtime unchanged             | `DoNothing`     |
//!
//! `CheckOffline` brings an asset online only when its path is inside a
//! configured import path and matches no exclusion pattern, the same rules
//! the bulk pass evaluates. Only this pass can bring an asset online.

use bridge_traits::paths::is_within;
use bridge_traits::{ExclusionMatcher, FileMetadata};
use core_library::{Asset, AssetStatus, OfflineBuckets};
use futures::future::join_all;
use std::path::Path;
use tracing::{debug, info, instrument, trace};

use crate::context::SyncContext;
use crate::error::Result;
use crate::file_sync::queue_post_sync_jobs;
use crate::job::{Job, JobStatus, QueueSyncAssets, SyncAssets};

/// Outcome of comparing one asset with its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSyncAction {
    Offline,
    DoNothing,
    CheckOffline,
    Update,
}

/// Decide what to do with an asset given its stat result.
///
/// A failed stat and a path that now names a directory both count as missing.
pub fn classify(asset: &Asset, stat: Option<&FileMetadata>) -> AssetSyncAction {
    let Some(stat) = stat.filter(|s| !s.is_directory) else {
        return if asset.is_offline {
            AssetSyncAction::DoNothing
        } else {
            AssetSyncAction::Offline
        };
    };

    if asset.is_offline && asset.status != AssetStatus::Deleted {
        return AssetSyncAction::CheckOffline;
    }

    match stat.modified_at {
        Some(mtime) if mtime != asset.file_modified_at => AssetSyncAction::Update,
        _ => AssetSyncAction::DoNothing,
    }
}

/// True when an offline asset's path is usable again.
pub fn is_back_online(path: &str, import_paths: &[String], exclusions: &ExclusionMatcher) -> bool {
    let in_import_path = import_paths.iter().any(|root| is_within(path, root));
    in_import_path && !exclusions.is_match(path)
}

pub struct AssetReconciler {
    ctx: SyncContext,
}

impl AssetReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, job), fields(directory_id = %job.directory_id))]
    pub async fn handle_queue_sync_assets(&self, job: QueueSyncAssets) -> Result<JobStatus> {
        let Some(directory) = self.ctx.directories.find_by_id(&job.directory_id).await? else {
            debug!("Directory not found, skipping reconciliation");
            return Ok(JobStatus::Skipped);
        };

        let Some(library) = self.ctx.live_library(&directory.library_id).await? else {
            debug!(library_id = %directory.library_id, "Library not found or deleted, skipping reconciliation");
            return Ok(JobStatus::Skipped);
        };

        let asset_count = self.ctx.assets.count_by_directory(&directory.id).await?;
        if asset_count == 0 {
            debug!("No assets in directory, skipping check");
            return Ok(JobStatus::Success);
        }

        let exclusions = ExclusionMatcher::new(&library.exclusion_patterns)?;
        let offlined = self
            .ctx
            .assets
            .detect_offline_by_directory(
                &directory.id,
                &library.import_paths,
                &exclusions.sql_regexes(),
                self.ctx.now(),
            )
            .await?;

        info!(
            offlined,
            asset_count, "Offlined assets outside import paths or excluded"
        );

        if offlined == asset_count as u64 {
            return Ok(JobStatus::Success);
        }

        let total_assets = asset_count as u64;
        let page_size = self.ctx.settings.page_size;
        let mut after: Option<String> = None;
        let mut count: u64 = 0;

        loop {
            let ids = self
                .ctx
                .assets
                .page_ids_by_directory(&directory.id, after.as_deref(), page_size)
                .await?;
            let Some(last) = ids.last().cloned() else {
                break;
            };
            let page_len = ids.len();
            count += page_len as u64;

            self.ctx
                .jobs
                .queue(Job::SyncAssets(SyncAssets {
                    library_id: library.id.clone(),
                    directory_id: directory.id.clone(),
                    import_paths: library.import_paths.clone(),
                    exclusion_patterns: library.exclusion_patterns.clone(),
                    asset_ids: ids,
                    progress_counter: count,
                    total_assets,
                }))
                .await?;

            debug!(count, total_assets, "Queued asset check page");

            if page_len < page_size {
                break;
            }
            after = Some(last);
        }

        info!(count, "Finished queuing asset checks");
        Ok(JobStatus::Success)
    }

    #[instrument(
        skip(self, job),
        fields(library_id = %job.library_id, directory_id = %job.directory_id, count = job.asset_ids.len())
    )]
    pub async fn handle_sync_assets(&self, job: SyncAssets) -> Result<JobStatus> {
        let exclusions = ExclusionMatcher::new(&job.exclusion_patterns)?;
        let assets = self.ctx.assets.find_by_ids(&job.asset_ids).await?;

        let stats = join_all(
            assets
                .iter()
                .map(|asset| self.ctx.fs.stat(Path::new(&asset.original_path))),
        )
        .await;

        let mut buckets = OfflineBuckets::default();
        let mut updates = Vec::new();
        let mut unchanged = 0usize;

        for (asset, stat) in assets.iter().zip(stats) {
            let stat = stat.ok();
            match classify(asset, stat.as_ref()) {
                AssetSyncAction::Offline => {
                    trace!(path = %asset.original_path, "Asset missing from disk, marking offline");
                    if asset.is_trashed() {
                        buckets.offline_trashed.push(asset.id.clone());
                    } else {
                        buckets.offline.push(asset.id.clone());
                    }
                }
                AssetSyncAction::CheckOffline => {
                    if is_back_online(&asset.original_path, &job.import_paths, &exclusions) {
                        trace!(path = %asset.original_path, "Offline asset is back online");
                        if asset.is_trashed() {
                            buckets.online_trashed.push(asset.id.clone());
                        } else {
                            buckets.online.push(asset.id.clone());
                        }
                    } else {
                        trace!(path = %asset.original_path, "Offline asset still outside import paths or excluded");
                        unchanged += 1;
                    }
                }
                AssetSyncAction::Update => {
                    if let Some(stat) = stat {
                        updates.push((
                            asset.id.clone(),
                            stat.modified_at.unwrap_or(asset.file_modified_at),
                            stat.size as i64,
                        ));
                    }
                }
                AssetSyncAction::DoNothing => unchanged += 1,
            }
        }

        let updated = updates.len();
        let now = self.ctx.now();
        if !buckets.is_empty() {
            self.ctx.assets.apply_offline_buckets(&buckets, now).await?;
        }

        if !updates.is_empty() {
            self.ctx.assets.update_file_stats(&updates, now).await?;
            let ids: Vec<String> = updates.into_iter().map(|(id, _, _)| id).collect();
            queue_post_sync_jobs(&self.ctx, &ids, &job.directory_id).await?;
        }

        let percentage = if job.total_assets > 0 {
            100.0 * job.progress_counter as f64 / job.total_assets as f64
        } else {
            100.0
        };
        info!(
            offlined = buckets.offline.len() + buckets.offline_trashed.len(),
            onlined = buckets.online.len() + buckets.online_trashed.len(),
            updated,
            unchanged,
            progress = format!("{} of {} ({:.1} %)", job.progress_counter, job.total_assets, percentage),
            "Checked existing assets"
        );

        Ok(JobStatus::Success)
    }
}
