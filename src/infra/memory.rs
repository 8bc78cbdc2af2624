//! In-process job store with the same claim semantics as the Postgres one.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    application::repos::{JobsRepo, NewJobRecord, RepoError},
    domain::{entities::JobRecord, types::JobStatus},
};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    record: JobRecord,
}

/// Job store held in memory behind one lock.
///
/// Claims are FIFO by insertion order. The lock is held only for the
/// duration of each call, never across a handler.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, oldest first.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.record.clone()).collect()
    }

    /// Move a job's lease start back, as if its worker had stalled.
    pub async fn backdate_lock(&self, id: Uuid, locked_at: OffsetDateTime) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        entry.record.locked_at = Some(locked_at);
        Ok(())
    }

    async fn finish(
        &self,
        id: Uuid,
        next: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        let record = &mut entry.record;

        if record.status != JobStatus::Processing {
            return Err(RepoError::InvalidTransition {
                id,
                status: record.status,
            });
        }
        record.status = record
            .status
            .transition_to(next)
            .map_err(|err| RepoError::from_transition(id, err))?;
        record.result = result;
        record.error = error;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl JobsRepo for MemoryJobStore {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<Uuid, RepoError> {
        let mut inner = self.inner.lock().await;
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.jobs.insert(
            id,
            Entry {
                seq,
                record: JobRecord {
                    id,
                    job_type: job.job_type.as_str().to_string(),
                    status: JobStatus::Pending,
                    payload: job.payload,
                    result: None,
                    error: None,
                    attempts: 0,
                    locked_by: None,
                    locked_at: None,
                    created_at: now,
                    updated_at: now,
                },
            },
        );

        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<JobRecord>, RepoError> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner
            .jobs
            .values_mut()
            .filter(|entry| entry.record.status == JobStatus::Pending)
            .min_by_key(|entry| entry.seq)
        else {
            return Ok(None);
        };

        let record = &mut entry.record;
        record.status = record
            .status
            .transition_to(JobStatus::Processing)
            .map_err(|err| RepoError::from_transition(record.id, err))?;
        let now = OffsetDateTime::now_utc();
        record.attempts += 1;
        record.locked_by = Some(worker_id.to_string());
        record.locked_at = Some(now);
        record.updated_at = now;

        Ok(Some(record.clone()))
    }

    async fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<(), RepoError> {
        self.finish(id, JobStatus::Completed, Some(result), None)
            .await
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), RepoError> {
        self.finish(id, JobStatus::Failed, None, Some(error.to_string()))
            .await
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<JobRecord>, RepoError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|entry| entry.record.clone()))
    }

    async fn fail_stale_jobs(
        &self,
        locked_before: OffsetDateTime,
        error: &str,
    ) -> Result<Vec<Uuid>, RepoError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let mut failed: Vec<(u64, Uuid)> = Vec::new();

        for entry in inner.jobs.values_mut() {
            let record = &mut entry.record;
            let stale = record.status == JobStatus::Processing
                && record
                    .locked_at
                    .is_some_and(|locked_at| locked_at < locked_before);
            if !stale {
                continue;
            }

            record.status = JobStatus::Failed;
            record.error = Some(error.to_string());
            record.updated_at = now;
            failed.push((entry.seq, record.id));
        }

        failed.sort_unstable();
        Ok(failed.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::JobType;
    use serde_json::json;

    fn job(n: u32) -> NewJobRecord {
        NewJobRecord {
            job_type: JobType::ProcessDocument,
            payload: json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn claim_stamps_lease_and_counts_attempts() {
        let store = MemoryJobStore::new();
        let id = store.enqueue_job(job(1)).await.expect("enqueue");

        let claimed = store
            .claim_next("worker-a")
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-a"));
        assert!(claimed.locked_at.is_some());
        assert!(store.claim_next("worker-b").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn terminal_calls_require_processing() {
        let store = MemoryJobStore::new();
        let id = store.enqueue_job(job(1)).await.expect("enqueue");

        assert!(matches!(
            store.complete_job(id, json!({})).await,
            Err(RepoError::InvalidTransition {
                status: JobStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            store.fail_job(Uuid::new_v4(), "boom").await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn stale_sweep_only_touches_old_leases() {
        let store = MemoryJobStore::new();
        let old = store.enqueue_job(job(1)).await.expect("enqueue");
        let fresh = store.enqueue_job(job(2)).await.expect("enqueue");
        store.claim_next("w").await.expect("claim");
        store.claim_next("w").await.expect("claim");

        let cutoff = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        store
            .backdate_lock(old, cutoff - time::Duration::minutes(1))
            .await
            .expect("backdate");

        let swept = store.fail_stale_jobs(cutoff, "lease expired").await.expect("sweep");
        assert_eq!(swept, vec![old]);

        let old_job = store.find_job(old).await.expect("find").expect("job");
        assert_eq!(old_job.status, JobStatus::Failed);
        assert_eq!(old_job.error.as_deref(), Some("lease expired"));
        let fresh_job = store.find_job(fresh).await.expect("find").expect("job");
        assert_eq!(fresh_job.status, JobStatus::Processing);
    }
}
