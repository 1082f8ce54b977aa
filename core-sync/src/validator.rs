//! # Import Path Validation
//!
//! Confirms a candidate import root is usable before it is crawled.
//!
//! Every failure is reported as data in an [`ImportPathValidation`] so a
//! caller validating many paths sees all of the results. Checks run in order
//! and the first failing one decides the message:
//!
//! 1. not inside the managed-storage tree
//! 2. absolute
//! 3. exists and is a directory
//! 4. readable

use bridge_traits::paths::{is_within, normalize_path};
use bridge_traits::{AccessMode, FileSystemAccess};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Outcome of validating one import path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPathValidation {
    pub import_path: String,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportPathValidation {
    fn valid(import_path: &str) -> Self {
        Self {
            import_path: import_path.to_string(),
            is_valid: true,
            message: None,
        }
    }

    fn invalid(import_path: &str, message: impl Into<String>) -> Self {
        Self {
            import_path: import_path.to_string(),
            is_valid: false,
            message: Some(message.into()),
        }
    }
}

pub struct PathValidator {
    fs: Arc<dyn FileSystemAccess>,
    media_location: PathBuf,
}

impl PathValidator {
    pub fn new(fs: Arc<dyn FileSystemAccess>, media_location: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            media_location: media_location.into(),
        }
    }

    pub async fn validate(&self, import_path: &str) -> ImportPathValidation {
        let path = Path::new(import_path);

        if path.is_absolute() && is_within(path, &self.media_location) {
            return ImportPathValidation::invalid(
                import_path,
                "Cannot use media upload folder for external libraries",
            );
        }

        if !path.is_absolute() {
            let resolved = std::env::current_dir()
                .map(|cwd| normalize_path(cwd.join(path)))
                .unwrap_or_else(|_| normalize_path(path));
            return ImportPathValidation::invalid(
                import_path,
                format!("Import path must be absolute, try {}", resolved),
            );
        }

        match self.fs.stat(path).await {
            Ok(metadata) if !metadata.is_directory => {
                return ImportPathValidation::invalid(import_path, "Not a directory");
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return ImportPathValidation::invalid(import_path, "Path does not exist (ENOENT)");
            }
            Err(e) => return ImportPathValidation::invalid(import_path, e.to_string()),
        }

        let readable = self
            .fs
            .check_access(path, AccessMode::Read)
            .await
            .unwrap_or(false);
        if !readable {
            return ImportPathValidation::invalid(import_path, "Lacking read permission for folder");
        }

        debug!(import_path, "Import path is valid");
        ImportPathValidation::valid(import_path)
    }

    /// Validate every path concurrently, results in input order.
    pub async fn validate_all(&self, import_paths: &[String]) -> Vec<ImportPathValidation> {
        join_all(import_paths.iter().map(|path| self.validate(path))).await
    }
}
