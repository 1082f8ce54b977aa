//! Domain models for the media library
//!
//! Typed records handed out by the repositories. Raw rows are converted once
//! at the repository boundary; nothing outside this crate sees a `SqliteRow`.

use crate::error::LibraryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryId(pub Uuid);

impl LibraryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for LibraryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryId(pub Uuid);

impl DirectoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DirectoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlbumId(pub Uuid);

impl AlbumId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AlbumId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle of a directory row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryStatus {
    /// Inserted, no file crawl queued yet
    Added,
    /// File crawl queued
    Queued,
    /// File crawl running
    Processing,
    Done,
    Failed,
    /// Path failed validation when the crawl ran
    Skipped,
}

impl DirectoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses a forced rescan re-offers
    pub fn unprocessed() -> [DirectoryStatus; 3] {
        [Self::Added, Self::Failed, Self::Skipped]
    }
}

impl fmt::Display for DirectoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectoryStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(LibraryError::InvalidInput {
                field: "status".to_string(),
                message: format!("Unknown directory status: {}", other),
            }),
        }
    }
}

/// Lifecycle of an asset row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Active,
    Trashed,
    Deleted,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trashed => "trashed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trashed" => Ok(Self::Trashed),
            "deleted" => Ok(Self::Deleted),
            other => Err(LibraryError::InvalidInput {
                field: "status".to_string(),
                message: format!("Unknown asset status: {}", other),
            }),
        }
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// One external library: a set of import roots owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Absolute roots crawled by a scan
    pub import_paths: Vec<String>,
    /// Glob patterns; matching paths are never imported and go offline
    pub exclusion_patterns: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Last completed directory crawl
    pub refreshed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl Library {
    pub const DEFAULT_NAME: &'static str = "New External Library";

    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        import_paths: Vec<String>,
        exclusion_patterns: Vec<String>,
        now: i64,
    ) -> Self {
        Self {
            id: LibraryId::new().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            import_paths,
            exclusion_patterns,
            created_at: now,
            updated_at: now,
            refreshed_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Library name cannot be empty".to_string());
        }

        if self.owner_id.trim().is_empty() {
            return Err("Library owner cannot be empty".to_string());
        }

        Ok(())
    }
}

/// One filesystem directory tracked under a library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    pub library_id: String,
    pub owner_id: String,
    /// Normalized absolute path without a trailing slash
    pub path: String,
    pub status: DirectoryStatus,
    pub is_offline: bool,
    /// Hidden from browsing by the owner. Only [`set_hidden`] changes it;
    /// sync stages leave it as they found it.
    ///
    /// [`set_hidden`]: crate::repositories::DirectoryRepository::set_hidden
    pub is_hidden: bool,
    /// Album auto-created for this directory on its first file import
    pub album_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// One file tracked under a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub owner_id: String,
    pub library_id: String,
    pub directory_id: String,
    /// Fingerprint used to detect re-imports within a library
    pub checksum: String,
    pub original_path: String,
    pub file_size: i64,
    /// Modification time in unix milliseconds
    pub file_modified_at: i64,
    pub is_offline: bool,
    pub status: AssetStatus,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Asset {
    pub fn is_trashed(&self) -> bool {
        self.status == AssetStatus::Trashed
    }
}

/// Candidate asset row built from a crawled path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub owner_id: String,
    pub library_id: String,
    pub directory_id: String,
    pub checksum: String,
    pub original_path: String,
    pub file_size: i64,
    pub file_modified_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Offline/online transitions computed by one reconciliation batch.
///
/// Trashed assets keep their trash timestamp across a transition, so they
/// travel in their own pair of buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineBuckets {
    pub offline: Vec<String>,
    pub offline_trashed: Vec<String>,
    pub online: Vec<String>,
    pub online_trashed: Vec<String>,
}

impl OfflineBuckets {
    pub fn is_empty(&self) -> bool {
        self.offline.is_empty()
            && self.offline_trashed.is_empty()
            && self.online.is_empty()
            && self.online_trashed.is_empty()
    }
}

/// Per-library counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStatistics {
    pub directories: i64,
    pub offline_directories: i64,
    pub assets: i64,
    pub online_assets: i64,
    pub offline_assets: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_status_round_trip() {
        for status in [
            DirectoryStatus::Added,
            DirectoryStatus::Queued,
            DirectoryStatus::Processing,
            DirectoryStatus::Done,
            DirectoryStatus::Failed,
            DirectoryStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<DirectoryStatus>().unwrap(), status);
        }
        assert!("pending".parse::<DirectoryStatus>().is_err());
    }

    #[test]
    fn test_asset_status_parse() {
        assert_eq!("trashed".parse::<AssetStatus>().unwrap(), AssetStatus::Trashed);
        assert!("gone".parse::<AssetStatus>().is_err());
    }

    #[test]
    fn test_library_validation() {
        let library = Library::new("user-1", Library::DEFAULT_NAME, vec![], vec![], 0);
        assert!(library.validate().is_ok());
        assert!(!library.is_deleted());

        let mut unnamed = library.clone();
        unnamed.name = "  ".to_string();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_unprocessed_statuses() {
        let statuses = DirectoryStatus::unprocessed();
        assert!(statuses.contains(&DirectoryStatus::Failed));
        assert!(!statuses.contains(&DirectoryStatus::Done));
    }

    #[test]
    fn test_offline_buckets_empty() {
        let mut buckets = OfflineBuckets::default();
        assert!(buckets.is_empty());
        buckets.online_trashed.push("a".to_string());
        assert!(!buckets.is_empty());
    }
}
