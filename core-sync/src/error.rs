use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job state: {0}")]
    InvalidStatus(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid payload for job {name}: {message}")]
    InvalidPayload { name: String, message: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Lock {0} is held by another instance")]
    LockUnavailable(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl SyncError {
    pub fn not_found(entity_type: &str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
