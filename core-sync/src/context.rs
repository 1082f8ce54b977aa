//! Collaborators and settings shared by every job handler.

use bridge_traits::{Clock, CounterStore, FileSystemAccess};
use core_library::repositories::{
    AlbumRepository, AssetRepository, DirectoryRepository, LibraryRepository,
    SqliteAlbumRepository, SqliteAssetRepository, SqliteDirectoryRepository,
    SqliteLibraryRepository,
};
use core_library::Library;
use core_runtime::EngineConfig;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::queue::JobQueue;
use crate::validator::PathValidator;

/// Engine settings the handlers read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Managed-storage tree rejected as an import path
    pub media_location: PathBuf,
    /// Crawler page size and id page size
    pub page_size: usize,
    pub supported_extensions: Vec<String>,
    pub default_exclusion_patterns: Vec<String>,
}

impl SyncSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            media_location: config.media_location.clone(),
            page_size: config.page_size.max(1),
            supported_extensions: config.supported_extensions.clone(),
            default_exclusion_patterns: config.default_exclusion_patterns.clone(),
        }
    }
}

/// Everything a handler needs to run a job
#[derive(Clone)]
pub struct SyncContext {
    pub libraries: Arc<dyn LibraryRepository>,
    pub directories: Arc<dyn DirectoryRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub albums: Arc<dyn AlbumRepository>,
    pub jobs: Arc<dyn JobQueue>,
    pub fs: Arc<dyn FileSystemAccess>,
    pub counters: Arc<dyn CounterStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: SyncSettings,
}

impl SyncContext {
    /// Wire the SQLite repositories over one pool.
    pub fn sqlite(
        pool: SqlitePool,
        config: &EngineConfig,
        jobs: Arc<dyn JobQueue>,
        fs: Arc<dyn FileSystemAccess>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            libraries: Arc::new(SqliteLibraryRepository::new(pool.clone())),
            directories: Arc::new(
                SqliteDirectoryRepository::new(pool.clone())
                    .with_chunk_size(config.directory_insert_chunk),
            ),
            assets: Arc::new(
                SqliteAssetRepository::new(pool.clone()).with_chunk_size(config.asset_insert_chunk),
            ),
            albums: Arc::new(SqliteAlbumRepository::new(pool)),
            jobs,
            fs,
            counters,
            clock,
            settings: SyncSettings::from_config(config),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    pub fn validator(&self) -> PathValidator {
        PathValidator::new(self.fs.clone(), self.settings.media_location.clone())
    }

    /// The library, unless it is missing or soft-deleted
    pub async fn live_library(&self, id: &str) -> Result<Option<Library>> {
        Ok(self
            .libraries
            .find_by_id(id)
            .await?
            .filter(|library| !library.is_deleted()))
    }
}
