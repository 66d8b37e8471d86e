//! Training job lifecycle and the model registry.
//!
//! Design:
//! - One tokio task per job; a semaphore bounds concurrent training
//! - Feature building and training run on the blocking pool
//! - Registry readers get an `Arc<ModelRecord>` snapshot, never a lock
//! - Every job transition and every registered model is persisted, on the
//!   blocking pool and outside the jobs and registry locks

pub mod jobs;
pub mod registry;

use mc_storage::StorageError;
use thiserror::Error;

pub use jobs::{JobConfig, JobManager, JobSnapshot, JobStatus, TrainingJob};
pub use registry::{ModelArtifact, ModelInfo, ModelRecord, ModelRegistry};

/// Errors surfaced to API callers. Each variant has a stable kind name.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("job '{0}' is already queued or running")]
    DuplicateJob(String),
    #[error("job '{0}' not found")]
    JobNotFound(String),
    #[error("model '{0}' not found")]
    ModelNotFound(String),
    #[error("no model is active; activate one first")]
    NoActiveModel,
    #[error("storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::DuplicateJob(_) => "DuplicateJobError",
            Self::JobNotFound(_) => "JobNotFoundError",
            Self::ModelNotFound(_) => "ModelNotFoundError",
            Self::NoActiveModel => "NoActiveModelError",
            Self::Storage(_) => "StorageError",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
