use std::time::Duration;

use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::{
    application::repos::{JobsRepo, NewJobRecord, RepoError},
    domain::{
        entities::JobRecord,
        types::{JobStatus, JobType, OutputFormat},
    },
};

use super::payloads::{GenerateTemplatePayload, ProcessDocumentPayload};

const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Enqueue a job with the provided payload, returning its id.
pub async fn enqueue_job<J, P>(repo: &J, job_type: JobType, payload: &P) -> Result<Uuid, RepoError>
where
    J: JobsRepo + ?Sized,
    P: serde::Serialize,
{
    let payload = serde_json::to_value(payload)
        .map_err(|err| RepoError::from_persistence(err.to_string()))?;
    repo.enqueue_job(NewJobRecord { job_type, payload }).await
}

pub async fn enqueue_process_document<J: JobsRepo + ?Sized>(
    repo: &J,
    document_id: &str,
    ext: Option<String>,
) -> Result<Uuid, RepoError> {
    let payload = ProcessDocumentPayload {
        document_id: document_id.to_string(),
        ext,
    };
    enqueue_job(repo, JobType::ProcessDocument, &payload).await
}

pub async fn enqueue_generate_template<J: JobsRepo + ?Sized>(
    repo: &J,
    document_id: &str,
    data: serde_json::Value,
    format: Option<OutputFormat>,
) -> Result<Uuid, RepoError> {
    let payload = GenerateTemplatePayload {
        document_id: document_id.to_string(),
        data,
        format,
    };
    enqueue_job(repo, JobType::GenerateTemplate, &payload).await
}

/// Block until the job finishes or the timeout elapses, returning the final job snapshot.
pub async fn wait_for_job_completion<J>(
    repo: &J,
    job_id: Uuid,
    timeout: Duration,
) -> Result<JobRecord, RepoError>
where
    J: JobsRepo + ?Sized,
{
    let deadline = Instant::now() + timeout;

    loop {
        let job = repo.find_job(job_id).await?.ok_or(RepoError::NotFound)?;

        match job.status {
            JobStatus::Completed => return Ok(job),
            JobStatus::Failed => {
                let message = job
                    .error
                    .unwrap_or_else(|| "job failed without error text".to_string());
                return Err(RepoError::from_persistence(message));
            }
            JobStatus::Pending | JobStatus::Processing => {
                if Instant::now() >= deadline {
                    return Err(RepoError::from_persistence(format!(
                        "job `{job_id}` timed out after {timeout:?}"
                    )));
                }

                sleep(DEFAULT_WAIT_POLL_INTERVAL).await;
            }
        }
    }
}
