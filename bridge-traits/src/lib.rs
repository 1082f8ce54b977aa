//! # Host Bridge Traits
//!
//! Platform abstraction traits consumed by the library synchronization engine.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine and host-specific
//! implementations. Each trait represents a capability the engine requires but
//! that a host may provide differently (native filesystem, network share, test
//! fake).
//!
//! ## Traits
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - stat, access checks, lazy crawls, change watching
//! - [`CounterStore`](storage::CounterStore) - Integer counters shared with downstream stages
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Helpers
//!
//! - [`paths`] - Lexical normalization of stored paths
//! - [`matcher`] - Exclusion globs and extension filters
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. I/O
//! failures keep their `std::io::ErrorKind` so callers can tell a missing path
//! from a permission problem.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod matcher;
pub mod paths;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use matcher::{ExclusionMatcher, ExtensionFilter, PathMatcher};
pub use storage::{
    AccessMode, CounterStore, CrawlMode, CrawlOptions, FileMetadata, FileSystemAccess,
    PathBatches, WatchEvent, WatchHandler, WatchOptions, WatchSubscription,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
