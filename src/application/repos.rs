//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{AuditLogRecord, DocumentRecord, JobRecord};
use crate::domain::error::DomainError;
use crate::domain::types::{DocumentStatus, JobStatus, JobType};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("invalid transition: job `{id}` is {}", status.as_str())]
    InvalidTransition { id: Uuid, status: JobStatus },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub(crate) fn from_transition(id: Uuid, err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, .. } => Self::InvalidTransition {
                id,
                status: from,
            },
            other => Self::Integrity {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub job_type: JobType,
    pub payload: serde_json::Value,
}

/// Durable job queue with an atomic claim step.
///
/// `claim_next` is the only synchronization point between workers: it must
/// hand each pending job to exactly one caller and skip rows another caller
/// is in the middle of claiming rather than waiting on them.
#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<Uuid, RepoError>;

    /// Move the oldest pending job to `PROCESSING` and return it.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<JobRecord>, RepoError>;

    async fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<(), RepoError>;

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), RepoError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<JobRecord>, RepoError>;

    /// Fail every `PROCESSING` job locked before `locked_before`, returning their ids.
    async fn fail_stale_jobs(
        &self,
        locked_before: OffsetDateTime,
        error: &str,
    ) -> Result<Vec<Uuid>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewDocumentRecord {
    pub name: String,
    pub ext: String,
    pub stored_path: String,
    pub mapping: Option<serde_json::Value>,
}

/// Document records. Ids are opaque strings owned by whoever uploads the
/// document; this crate never parses them.
#[async_trait]
pub trait DocumentsRepo: Send + Sync {
    async fn create_document(&self, document: NewDocumentRecord) -> Result<String, RepoError>;

    async fn find_document(&self, id: &str) -> Result<Option<DocumentRecord>, RepoError>;

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), RepoError>;

    /// Record a finished artifact and mark the document `COMPLETED`.
    async fn record_artifact(&self, id: &str, artifact_path: &str) -> Result<(), RepoError>;

    async fn update_mapping(&self, id: &str, mapping: serde_json::Value) -> Result<(), RepoError>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError>;
}
