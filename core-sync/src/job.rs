//! # Job Model
//!
//! Typed payloads for every unit of work the engine schedules.
//!
//! ## Overview
//!
//! Jobs are the only place work is remembered between steps: a handler reads
//! its payload, does one bounded piece of work and queues follow-up jobs. The
//! wire shape is `{"name": "<job-name>", "data": {...}}` with camelCase
//! payload fields, so rows written by one version of the engine stay readable
//! by the next.
//!
//! ## Pipeline
//!
//! ```text
//! queue-sync-directories → sync-directories → queue-sync-files → sync-files → sidecar-discovery
//!                                           ↘ queue-sync-assets → sync-assets ↗
//! ```

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Queues
// ============================================================================

/// Named queue a job is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Crawl, insert, reconcile and delete work run by this engine
    Library,
    /// Per-asset follow-up work consumed by downstream metadata stages
    Discovery,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Library => "library",
            QueueName::Discovery => "discovery",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "library" => Ok(QueueName::Library),
            "discovery" => Ok(QueueName::Discovery),
            other => Err(SyncError::Queue(format!("Unknown queue: {}", other))),
        }
    }
}

// ============================================================================
// Handler Results
// ============================================================================

/// Terminal result a handler reports for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(SyncError::InvalidStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSyncDirectories {
    pub library_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDirectories {
    pub library_id: String,
    pub directories: Vec<String>,
    pub progress_counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_directories: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSyncFiles {
    pub directory_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFiles {
    pub library_id: String,
    pub directory_id: String,
    pub paths: Vec<String>,
    pub progress_counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_assets: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSyncAssets {
    pub directory_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAssets {
    pub library_id: String,
    pub directory_id: String,
    pub import_paths: Vec<String>,
    pub exclusion_patterns: Vec<String>,
    pub asset_ids: Vec<String>,
    pub progress_counter: u64,
    pub total_assets: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRemoval {
    pub library_id: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDelete {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryQueueScanAll {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarDiscovery {
    pub id: String,
    pub directory_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDeletion {
    pub id: String,
}

// ============================================================================
// Job
// ============================================================================

/// A unit of work with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum Job {
    QueueSyncDirectories(QueueSyncDirectories),
    SyncDirectories(SyncDirectories),
    QueueSyncFiles(QueueSyncFiles),
    SyncFiles(SyncFiles),
    QueueSyncAssets(QueueSyncAssets),
    SyncAssets(SyncAssets),
    AssetRemoval(AssetRemoval),
    AssetDeletion(AssetDeletion),
    LibraryDelete(LibraryDelete),
    LibraryQueueCleanup,
    LibraryQueueScanAll(LibraryQueueScanAll),
    SidecarDiscovery(SidecarDiscovery),
}

impl Job {
    /// Wire name of the job
    pub fn name(&self) -> &'static str {
        match self {
            Job::QueueSyncDirectories(_) => "queue-sync-directories",
            Job::SyncDirectories(_) => "sync-directories",
            Job::QueueSyncFiles(_) => "queue-sync-files",
            Job::SyncFiles(_) => "sync-files",
            Job::QueueSyncAssets(_) => "queue-sync-assets",
            Job::SyncAssets(_) => "sync-assets",
            Job::AssetRemoval(_) => "asset-removal",
            Job::AssetDeletion(_) => "asset-deletion",
            Job::LibraryDelete(_) => "library-delete",
            Job::LibraryQueueCleanup => "library-queue-cleanup",
            Job::LibraryQueueScanAll(_) => "library-queue-scan-all",
            Job::SidecarDiscovery(_) => "sidecar-discovery",
        }
    }

    /// Queue the job is routed to
    pub fn queue(&self) -> QueueName {
        match self {
            Job::SidecarDiscovery(_) => QueueName::Discovery,
            _ => QueueName::Library,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::InvalidPayload {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }

    /// Decode a stored `(name, data)` pair.
    pub fn from_parts(name: &str, data: &str) -> Result<Self> {
        let data: serde_json::Value =
            serde_json::from_str(data).map_err(|e| SyncError::InvalidPayload {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let envelope = if data.is_null() {
            serde_json::json!({ "name": name })
        } else {
            serde_json::json!({ "name": name, "data": data })
        };

        serde_json::from_value(envelope).map_err(|e| {
            let message = e.to_string();
            if message.contains("unknown variant") {
                SyncError::UnknownJob(name.to_string())
            } else {
                SyncError::InvalidPayload {
                    name: name.to_string(),
                    message,
                }
            }
        })
    }

    /// Payload alone, `null` for jobs without one
    pub fn data_json(&self) -> Result<String> {
        let value = serde_json::to_value(self).map_err(|e| SyncError::InvalidPayload {
            name: self.name().to_string(),
            message: e.to_string(),
        })?;
        let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
        Ok(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_uses_kebab_names_and_camel_fields() {
        let job = Job::SyncFiles(SyncFiles {
            library_id: "lib".to_string(),
            directory_id: "dir".to_string(),
            paths: vec!["/data/a.jpg".to_string()],
            progress_counter: 1,
            total_assets: None,
            force: true,
        });

        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(value["name"], "sync-files");
        assert_eq!(value["data"]["libraryId"], "lib");
        assert_eq!(value["data"]["directoryId"], "dir");
        assert_eq!(value["data"]["progressCounter"], 1);
        assert!(value["data"].get("totalAssets").is_none());
        assert_eq!(job.name(), "sync-files");
    }

    #[test]
    fn test_from_parts() {
        let job = Job::from_parts(
            "queue-sync-directories",
            r#"{"libraryId":"lib-1","force":true}"#,
        )
        .unwrap();
        assert_eq!(
            job,
            Job::QueueSyncDirectories(QueueSyncDirectories {
                library_id: "lib-1".to_string(),
                force: true,
            })
        );

        let cleanup = Job::from_parts("library-queue-cleanup", "null").unwrap();
        assert_eq!(cleanup, Job::LibraryQueueCleanup);
        assert_eq!(cleanup.data_json().unwrap(), "null");
    }

    #[test]
    fn test_force_defaults_to_false() {
        let job = Job::from_parts("queue-sync-files", r#"{"directoryId":"d"}"#).unwrap();
        assert_eq!(
            job,
            Job::QueueSyncFiles(QueueSyncFiles {
                directory_id: "d".to_string(),
                force: false,
            })
        );
    }

    #[test]
    fn test_from_parts_errors() {
        assert!(matches!(
            Job::from_parts("transcode", "{}"),
            Err(SyncError::UnknownJob(_))
        ));
        assert!(matches!(
            Job::from_parts("library-delete", r#"{"libraryId":"x"}"#),
            Err(SyncError::InvalidPayload { .. })
        ));
        assert!(matches!(
            Job::from_parts("library-delete", "not json"),
            Err(SyncError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_queue_routing() {
        let discovery = Job::SidecarDiscovery(SidecarDiscovery {
            id: "a".to_string(),
            directory_id: "d".to_string(),
        });
        assert_eq!(discovery.queue(), QueueName::Discovery);
        assert_eq!(Job::LibraryQueueCleanup.queue(), QueueName::Library);
        assert_eq!("discovery".parse::<QueueName>().unwrap(), QueueName::Discovery);
        assert!("media".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Success, JobStatus::Failed, JobStatus::Skipped] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }
}
