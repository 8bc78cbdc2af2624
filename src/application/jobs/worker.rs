use std::time::{Duration, Instant};

use metrics::counter;
use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::{
        audit::{ACTION_JOB_FAILED, ACTION_JOB_RECOVERED, AuditEvent},
        repos::RepoError,
    },
    domain::{entities::JobRecord, types::DocumentStatus},
};

use super::{
    JobError,
    context::JobWorkerContext,
    handlers::{dispatch, payload_document_id},
};

pub const METRIC_JOBS_CLAIMED: &str = "docflow_jobs_claimed_total";
pub const METRIC_JOBS_COMPLETED: &str = "docflow_jobs_completed_total";
pub const METRIC_JOBS_FAILED: &str = "docflow_jobs_failed_total";
pub const METRIC_JOBS_RECOVERED: &str = "docflow_jobs_recovered_total";

pub const STALE_LEASE_ERROR: &str = "lease expired before the job finished";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_ERROR_BACKOFF_FACTOR: u32 = 5;
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Multiplier applied to `poll_interval` after the store itself failed.
    pub error_backoff_factor: u32,
    /// Lease length for the stale-claim sweep. `None` disables it.
    pub stale_after: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff_factor: DEFAULT_ERROR_BACKOFF_FACTOR,
            stale_after: Some(DEFAULT_STALE_AFTER),
        }
    }
}

impl WorkerOptions {
    fn error_backoff(&self) -> Duration {
        self.poll_interval
            .saturating_mul(self.error_backoff_factor.max(1))
    }
}

/// One polling loop. A process may run several against the same store.
pub struct Worker {
    ctx: JobWorkerContext,
    options: WorkerOptions,
    last_sweep: Option<Instant>,
}

impl Worker {
    pub fn new(ctx: JobWorkerContext, options: WorkerOptions) -> Self {
        Self {
            ctx,
            options,
            last_sweep: None,
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A job already claimed is always driven to a terminal status before the
    /// shutdown signal is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target = "application::jobs::worker",
            worker_id = %self.options.worker_id,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.sweep_if_due().await;

            let delay = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.options.poll_interval,
                Err(err) => {
                    let backoff = self.options.error_backoff();
                    warn!(
                        target = "application::jobs::worker",
                        worker_id = %self.options.worker_id,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "claim failed; backing off"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            target = "application::jobs::worker",
            worker_id = %self.options.worker_id,
            "worker stopped"
        );
    }

    /// Claim and execute at most one job. `Ok(false)` means the queue was empty.
    pub async fn run_once(&self) -> Result<bool, RepoError> {
        let Some(job) = self.ctx.jobs.claim_next(&self.options.worker_id).await? else {
            return Ok(false);
        };

        counter!(METRIC_JOBS_CLAIMED, "type" => job.job_type.clone()).increment(1);
        self.execute(job).await;
        Ok(true)
    }

    async fn execute(&self, job: JobRecord) {
        let started_at = Instant::now();

        match dispatch(&self.ctx, &job).await {
            Ok(result) => match self.ctx.jobs.complete_job(job.id, result).await {
                Ok(()) => {
                    counter!(METRIC_JOBS_COMPLETED, "type" => job.job_type.clone()).increment(1);
                    info!(
                        target = "application::jobs::worker",
                        op = "job::complete",
                        result = "ok",
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "job completed"
                    );
                }
                Err(err) => error!(
                    target = "application::jobs::worker",
                    op = "job::complete",
                    result = "error",
                    job_id = %job.id,
                    error = %err,
                    "failed to record job completion"
                ),
            },
            Err(err @ JobError::ClaimLost(_)) => warn!(
                target = "application::jobs::worker",
                op = "job::execute",
                result = "discarded",
                job_id = %job.id,
                job_type = %job.job_type,
                error = %err,
                "job finished after its lease was lost"
            ),
            Err(err) => {
                let message = err.to_string();
                warn!(
                    target = "application::jobs::worker",
                    op = "job::execute",
                    result = "error",
                    job_id = %job.id,
                    job_type = %job.job_type,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %message,
                    "job handler failed"
                );
                self.fail(&job, &message).await;
            }
        }
    }

    async fn fail(&self, job: &JobRecord, message: &str) {
        if let Err(err) = self.ctx.jobs.fail_job(job.id, message).await {
            error!(
                target = "application::jobs::worker",
                op = "job::fail",
                job_id = %job.id,
                error = %err,
                "failed to record job failure"
            );
            return;
        }

        counter!(METRIC_JOBS_FAILED, "type" => job.job_type.clone()).increment(1);
        mark_document_failed(&self.ctx, job).await;
        self.ctx
            .audit
            .record_quietly(AuditEvent::system(ACTION_JOB_FAILED, "job", job.id).with_payload(
                &json!({ "type": job.job_type, "error": message }),
            ))
            .await;
    }

    async fn sweep_if_due(&mut self) {
        let Some(stale_after) = self.options.stale_after else {
            return;
        };
        if self
            .last_sweep
            .is_some_and(|swept_at| swept_at.elapsed() < stale_after)
        {
            return;
        }

        self.last_sweep = Some(Instant::now());
        if let Err(err) = recover_stale_jobs(&self.ctx, stale_after).await {
            warn!(
                target = "application::jobs::worker",
                op = "job::recover",
                error = %err,
                "stale claim sweep failed"
            );
        }
    }
}

/// Fail every job whose claim is older than `stale_after`.
pub async fn recover_stale_jobs(
    ctx: &JobWorkerContext,
    stale_after: Duration,
) -> Result<Vec<Uuid>, RepoError> {
    let lease = time::Duration::try_from(stale_after).map_err(|err| RepoError::InvalidInput {
        message: format!("lease out of range: {err}"),
    })?;
    let locked_before = OffsetDateTime::now_utc()
        .checked_sub(lease)
        .ok_or_else(|| RepoError::InvalidInput {
            message: "lease out of range".to_string(),
        })?;

    let recovered = ctx
        .jobs
        .fail_stale_jobs(locked_before, STALE_LEASE_ERROR)
        .await?;

    for id in &recovered {
        counter!(METRIC_JOBS_RECOVERED).increment(1);
        match ctx.jobs.find_job(*id).await {
            Ok(Some(job)) => mark_document_failed(ctx, &job).await,
            Ok(None) => {}
            Err(err) => warn!(
                target = "application::jobs::worker",
                op = "job::recover",
                job_id = %id,
                error = %err,
                "failed to reload recovered job"
            ),
        }
        ctx.audit
            .record_quietly(
                AuditEvent::system(ACTION_JOB_RECOVERED, "job", id)
                    .with_payload(&json!({ "error": STALE_LEASE_ERROR })),
            )
            .await;
    }

    if !recovered.is_empty() {
        warn!(
            target = "application::jobs::worker",
            op = "job::recover",
            count = recovered.len(),
            lease_seconds = stale_after.as_secs(),
            "failed stale job claims"
        );
    }

    Ok(recovered)
}

async fn mark_document_failed(ctx: &JobWorkerContext, job: &JobRecord) {
    let Some(document_id) = payload_document_id(&job.payload) else {
        return;
    };

    if let Err(err) = ctx
        .documents
        .update_status(document_id, DocumentStatus::Failed)
        .await
    {
        warn!(
            target = "application::jobs::worker",
            job_id = %job.id,
            document_id = %document_id,
            error = %err,
            "failed to mark document as failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_multiplies_poll_interval() {
        let options = WorkerOptions {
            poll_interval: Duration::from_millis(200),
            error_backoff_factor: 5,
            ..WorkerOptions::default()
        };
        assert_eq!(options.error_backoff(), Duration::from_secs(1));

        let zero = WorkerOptions {
            error_backoff_factor: 0,
            ..options
        };
        assert_eq!(zero.error_backoff(), Duration::from_millis(200));
    }
}
