//! # Repository Pattern Implementation
//!
//! This module provides repository traits and SQLite implementations for the
//! library registries.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//! - Batch writes are chunked below SQLite's bound-parameter limit
//!
//! ## Available Repositories
//!
//! - `LibraryRepository` - Library roots, exclusion patterns and soft deletion
//! - `DirectoryRepository` - Discovered directories and their status lifecycle
//! - `AssetRepository` - Discovered files, offline detection and id pages
//! - `AlbumRepository` - Auto-created directory albums

pub mod album;
pub mod asset;
pub mod directory;
pub mod library;

pub use album::{AlbumRepository, SqliteAlbumRepository};
pub use asset::{AssetRepository, SqliteAssetRepository};
pub use directory::{DirectoryRepository, SqliteDirectoryRepository};
pub use library::{LibraryRepository, SqliteLibraryRepository};

use bridge_traits::paths::normalize_path;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

/// Directory rows per insert statement (4 bound parameters per row)
pub const DEFAULT_DIRECTORY_CHUNK: usize = 5_000;

/// Asset rows per insert statement (8 bound parameters per row)
pub const DEFAULT_ASSET_CHUNK: usize = 4_000;

/// Bind `values` as a parenthesized list, closing the `IN (` the caller opened.
pub(crate) fn push_in_list(builder: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

/// Normalize paths and drop repeats, keeping first-seen order.
pub(crate) fn dedup_normalized(paths: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(paths.len());
    paths
        .iter()
        .map(normalize_path)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_normalized_keeps_order() {
        let input = vec![
            "/data/b/".to_string(),
            "/data/a".to_string(),
            "/data/b".to_string(),
        ];
        assert_eq!(dedup_normalized(&input), vec!["/data/b", "/data/a"]);
    }

    #[test]
    fn test_push_in_list_sql() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT 1 WHERE x IN (");
        push_in_list(&mut builder, &["a".to_string(), "b".to_string()]);
        assert_eq!(builder.sql(), "SELECT 1 WHERE x IN (?, ?)");
    }
}
