use std::convert::TryFrom;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{JobsRepo, NewJobRecord, RepoError},
    domain::{entities::JobRecord, types::JobStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

const JOB_COLUMNS: &str = "id, job_type, status, payload, result, error, attempts, \
    locked_by, locked_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    attempts: i32,
    locked_by: Option<String>,
    locked_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job status `{}`", row.status))
        })?;

        Ok(Self {
            id: row.id,
            job_type: row.job_type,
            status,
            payload: row.payload,
            result: row.result,
            error: row.error,
            attempts: row.attempts,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PostgresRepositories {
    /// Explain why a guarded terminal update touched no row.
    async fn terminal_miss(&self, id: Uuid, next: JobStatus) -> RepoError {
        match self.find_job(id).await {
            Ok(Some(job)) => match job.status.transition_to(next) {
                Err(err) => RepoError::from_transition(id, err),
                Ok(_) => RepoError::InvalidTransition {
                    id,
                    status: job.status,
                },
            },
            Ok(None) => RepoError::NotFound,
            Err(err) => err,
        }
    }
}

#[async_trait]
impl JobsRepo for PostgresRepositories {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<Uuid, RepoError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, status, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(job.job_type.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(&job.payload)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<JobRecord>, RepoError> {
        let sql = format!(
            r#"
            UPDATE jobs
               SET status = 'PROCESSING',
                   attempts = attempts + 1,
                   locked_by = $1,
                   locked_at = now(),
                   updated_at = now()
             WHERE id = (
                   SELECT id
                     FROM jobs
                    WHERE status = 'PENDING'
                    ORDER BY created_at, id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
             )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(worker_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<(), RepoError> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
               SET status = 'COMPLETED',
                   result = $2,
                   error = NULL,
                   updated_at = now()
             WHERE id = $1
               AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(&result)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if outcome.rows_affected() == 0 {
            return Err(self.terminal_miss(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), RepoError> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
               SET status = 'FAILED',
                   error = $2,
                   updated_at = now()
             WHERE id = $1
               AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if outcome.rows_affected() == 0 {
            return Err(self.terminal_miss(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<JobRecord>, RepoError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn fail_stale_jobs(
        &self,
        locked_before: OffsetDateTime,
        error: &str,
    ) -> Result<Vec<Uuid>, RepoError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
               SET status = 'FAILED',
                   error = $2,
                   updated_at = now()
             WHERE status = 'PROCESSING'
               AND locked_at < $1
            RETURNING id
            "#,
        )
        .bind(locked_before)
        .bind(error)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
