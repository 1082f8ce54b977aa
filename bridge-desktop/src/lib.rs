//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using native libraries:
//! - `FileSystemAccess` using `tokio::fs`, a worklist [`DiskCrawler`] and `notify`
//! - `CounterStore` using a SQLite-backed counter table
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{SqliteCounterStore, TokioFileSystem};
//! use bridge_traits::{CounterStore, FileSystemAccess};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let counters = SqliteCounterStore::in_memory().await.unwrap();
//!
//!     // Use in engine configuration
//! }
//! ```

mod counter;
mod crawler;
mod filesystem;
mod watcher;

pub use counter::SqliteCounterStore;
pub use crawler::DiskCrawler;
pub use filesystem::TokioFileSystem;
pub use watcher::{watch_paths, NotifySubscription};
