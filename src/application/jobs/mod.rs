use thiserror::Error;
use uuid::Uuid;

use crate::{
    application::{engine::EngineError, repos::RepoError, template::RenderError},
    infra::storage::StorageError,
};

mod context;
mod handlers;
mod payloads;
mod queue;
mod worker;

pub use context::JobWorkerContext;
pub use handlers::{dispatch, generate_template, payload_document_id, process_document};
pub use payloads::{DEFAULT_SOURCE_EXTENSION, GenerateTemplatePayload, ProcessDocumentPayload};
pub use queue::{
    enqueue_generate_template, enqueue_job, enqueue_process_document, wait_for_job_completion,
};
pub use worker::{
    METRIC_JOBS_CLAIMED, METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED, METRIC_JOBS_RECOVERED,
    STALE_LEASE_ERROR, Worker, WorkerOptions, recover_stale_jobs,
};

/// Failure raised by a job handler. Its display text becomes the job's `error`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),
    #[error("document `{0}` not found")]
    DocumentNotFound(String),
    #[error("job `{0}` is no longer claimed; result discarded")]
    ClaimLost(Uuid),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
