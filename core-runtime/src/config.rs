//! # Engine Configuration Module
//!
//! Provides configuration management for the library synchronization engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `EngineConfig`. It enforces fail-fast validation so a bad page size or a
//! missing managed-storage location is reported at startup rather than in the
//! middle of a crawl.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .database_path("/var/lib/media/library.db")
//!     .media_location("/var/lib/media/upload")
//!     .watch_enabled(true)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::EngineConfig;
//!
//! // Missing the managed-storage location
//! let config = EngineConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .build()
//!     .expect("Should fail - missing media location");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Media extensions accepted by crawls and watchers.
pub const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] = &[
    "3fr", "ari", "arw", "avif", "bmp", "cap", "cin", "cr2", "cr3", "crw", "dcr", "dng", "erf",
    "fff", "gif", "heic", "heif", "hif", "iiq", "insp", "jpe", "jpeg", "jpg", "jxl", "k25", "kdc",
    "mrw", "nef", "orf", "ori", "pef", "png", "psd", "raf", "raw", "rw2", "rwl", "sr2", "srf",
    "srw", "svg", "tif", "tiff", "webp", "x3f", "3gp", "avi", "flv", "insv", "m2ts", "m4v",
    "mkv", "mov", "mp4", "mpg", "mts", "webm", "wmv",
];

/// Bound-parameter limit of a single SQLite statement.
pub const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Exclusion patterns applied to new libraries when none are given.
pub const DEFAULT_EXCLUSION_PATTERNS: &[&str] =
    &["**/@eaDir/**", "**/._*", "**/#recycle/**", "**/#snapshot/**"];

/// Filesystem watching settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    pub enabled: bool,
}

/// Periodic scan-all trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub enabled: bool,
    /// Time between scan-all runs
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Configuration for the library synchronization engine.
///
/// Use [`EngineConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub database_path: PathBuf,

    /// The application's managed-storage tree; never usable as an import path
    pub media_location: PathBuf,

    /// Crawler page size and id-stream page size
    pub page_size: usize,

    /// Rows per directory insert statement
    pub directory_insert_chunk: usize,

    /// Rows per asset insert statement
    pub asset_insert_chunk: usize,

    /// Lower-case file extensions treated as media
    pub supported_extensions: Vec<String>,

    /// Exclusions given to libraries created without their own
    pub default_exclusion_patterns: Vec<String>,

    pub watch: WatchConfig,

    pub scan: ScanConfig,

    /// Number of concurrent library-queue workers
    pub worker_concurrency: usize,

    /// Attempts before a job whose handler errored is marked failed
    pub max_job_attempts: u32,

    /// Idle delay between queue polls
    pub poll_interval_ms: u64,

    /// How long completed and failed job rows are kept
    #[serde(with = "duration_secs", default = "default_job_retention")]
    pub job_retention: Duration,
}

fn default_job_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path and media location are not empty
    /// - Page and chunk sizes are positive and chunks stay under SQLite's
    ///   bound-parameter limit
    /// - Worker and retry settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.media_location.as_os_str().is_empty() {
            return Err(Error::Config("Media location cannot be empty".to_string()));
        }

        if !self.media_location.is_absolute() {
            return Err(Error::Config(format!(
                "Media location must be absolute, got {}",
                self.media_location.display()
            )));
        }

        if self.page_size == 0 {
            return Err(Error::Config("Page size must be greater than 0".to_string()));
        }

        // Directory rows bind 4 parameters, asset rows bind 8.
        if self.directory_insert_chunk == 0
            || self.directory_insert_chunk * 4 > SQLITE_MAX_VARIABLES
        {
            return Err(Error::Config(format!(
                "Directory insert chunk must be between 1 and {}",
                SQLITE_MAX_VARIABLES / 4
            )));
        }

        if self.asset_insert_chunk == 0 || self.asset_insert_chunk * 8 > SQLITE_MAX_VARIABLES {
            return Err(Error::Config(format!(
                "Asset insert chunk must be between 1 and {}",
                SQLITE_MAX_VARIABLES / 8
            )));
        }

        if self.worker_concurrency == 0 {
            return Err(Error::Config(
                "Worker concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_job_attempts == 0 {
            return Err(Error::Config(
                "Max job attempts must be greater than 0".to_string(),
            ));
        }

        if self.scan.enabled && self.scan.interval.is_zero() {
            return Err(Error::Config(
                "Scan interval must be greater than 0 when scheduled scans are enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    database_path: Option<PathBuf>,
    media_location: Option<PathBuf>,
    page_size: Option<usize>,
    directory_insert_chunk: Option<usize>,
    asset_insert_chunk: Option<usize>,
    supported_extensions: Option<Vec<String>>,
    default_exclusion_patterns: Option<Vec<String>>,
    watch: WatchConfig,
    scan: ScanConfig,
    worker_concurrency: Option<usize>,
    max_job_attempts: Option<u32>,
    poll_interval_ms: Option<u64>,
    job_retention: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::EngineConfig;
    ///
    /// let builder = EngineConfig::builder()
    ///     .database_path("/path/to/library.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the managed-storage tree that import paths may not point into.
    pub fn media_location<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.media_location = Some(path.into());
        self
    }

    /// Default: 10 000
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Default: 5 000
    pub fn directory_insert_chunk(mut self, size: usize) -> Self {
        self.directory_insert_chunk = Some(size);
        self
    }

    /// Default: 4 000
    pub fn asset_insert_chunk(mut self, size: usize) -> Self {
        self.asset_insert_chunk = Some(size);
        self
    }

    pub fn supported_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }

    pub fn default_exclusion_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_exclusion_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn watch_enabled(mut self, enabled: bool) -> Self {
        self.watch.enabled = enabled;
        self
    }

    /// Enable the periodic scan-all trigger.
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan = ScanConfig {
            enabled: true,
            interval,
        };
        self
    }

    /// Default: 4
    pub fn worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = Some(workers);
        self
    }

    /// Default: 3
    pub fn max_job_attempts(mut self, attempts: u32) -> Self {
        self.max_job_attempts = Some(attempts);
        self
    }

    /// Default: 250 ms
    pub fn poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = Some(interval);
        self
    }

    /// Default: 24 hours
    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = Some(retention);
        self
    }

    /// Builds the final `EngineConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required field is missing or a value is
    /// out of range.
    pub fn build(self) -> Result<EngineConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let media_location = self.media_location.ok_or_else(|| {
            Error::Config(
                "Media location is required. Use .media_location() to set it.".to_string(),
            )
        })?;

        let config = EngineConfig {
            database_path,
            media_location,
            page_size: self.page_size.unwrap_or(10_000),
            directory_insert_chunk: self.directory_insert_chunk.unwrap_or(5_000),
            asset_insert_chunk: self.asset_insert_chunk.unwrap_or(4_000),
            supported_extensions: self.supported_extensions.unwrap_or_else(|| {
                DEFAULT_SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|e| e.to_string())
                    .collect()
            }),
            default_exclusion_patterns: self.default_exclusion_patterns.unwrap_or_else(|| {
                DEFAULT_EXCLUSION_PATTERNS
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            }),
            watch: self.watch,
            scan: self.scan,
            worker_concurrency: self.worker_concurrency.unwrap_or(4),
            max_job_attempts: self.max_job_attempts.unwrap_or(3),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(250),
            job_retention: self.job_retention.unwrap_or_else(default_job_retention),
        };

        config.validate()?;

        Ok(config)
    }
}
