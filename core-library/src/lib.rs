//! # Library Management Module
//!
//! Owns the library database and provides repository patterns for data
//! access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Typed records for libraries, directories, assets and albums
//! - Set-based repository operations (chunked insert-or-ignore, bulk updates
//!   by id list, keyset id pages) used by the synchronization engine

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    Album, AlbumId, Asset, AssetId, AssetStatus, Directory, DirectoryId, DirectoryStatus,
    Library, LibraryId, LibraryStatistics, NewAsset, OfflineBuckets,
};
