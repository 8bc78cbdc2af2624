use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;

use docflow::application::audit::{AuditEvent, AuditService};
use docflow::application::repos::{
    DocumentsRepo, JobsRepo, NewDocumentRecord, NewJobRecord, RepoError,
};
use docflow::domain::types::{DocumentStatus, JobStatus, JobType};
use docflow::infra::db::PostgresRepositories;

fn new_job(tag: &str) -> NewJobRecord {
    NewJobRecord {
        job_type: JobType::ProcessDocument,
        payload: json!({ "tag": tag }),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claim_follows_creation_order(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let a = repos.enqueue_job(new_job("A")).await.expect("enqueue A");
    let b = repos.enqueue_job(new_job("B")).await.expect("enqueue B");

    let first = repos.claim_next("w1").await.expect("claim").expect("A");
    assert_eq!(first.id, a);
    assert_eq!(first.status, JobStatus::Processing);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.locked_by.as_deref(), Some("w1"));
    assert!(first.locked_at.is_some());

    let second = repos.claim_next("w2").await.expect("claim").expect("B");
    assert_eq!(second.id, b);
    assert!(repos.claim_next("w3").await.expect("claim").is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claims_never_share_a_job(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut expected = HashSet::new();
    for n in 0..30 {
        expected.insert(
            repos
                .enqueue_job(new_job(&n.to_string()))
                .await
                .expect("enqueue"),
        );
    }

    let mut handles = Vec::new();
    for worker in 0..6 {
        let repos = repos.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("w{worker}");
            let mut claimed = Vec::new();
            while let Some(job) = repos.claim_next(&worker_id).await.expect("claim") {
                repos
                    .complete_job(job.id, json!({ "by": worker_id }))
                    .await
                    .expect("complete");
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.expect("join") {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen, expected);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn terminal_updates_require_processing(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let id = repos.enqueue_job(new_job("x")).await.expect("enqueue");

    assert!(matches!(
        repos.complete_job(id, json!({})).await,
        Err(RepoError::InvalidTransition {
            status: JobStatus::Pending,
            ..
        })
    ));

    repos.claim_next("w").await.expect("claim").expect("job");
    repos.fail_job(id, "boom").await.expect("fail");
    assert!(matches!(
        repos.complete_job(id, json!({})).await,
        Err(RepoError::InvalidTransition {
            status: JobStatus::Failed,
            ..
        })
    ));
    assert!(matches!(
        repos.fail_job(uuid::Uuid::new_v4(), "ghost").await,
        Err(RepoError::NotFound)
    ));

    let job = repos.find_job(id).await.expect("find").expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert_eq!(job.result, None);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_leases_are_failed(pool: PgPool) {
    let repos = PostgresRepositories::new(pool.clone());
    let stale = repos.enqueue_job(new_job("stale")).await.expect("enqueue");
    let fresh = repos.enqueue_job(new_job("fresh")).await.expect("enqueue");
    repos.claim_next("w").await.expect("claim").expect("stale");
    repos.claim_next("w").await.expect("claim").expect("fresh");

    sqlx::query("UPDATE jobs SET locked_at = now() - interval '2 hours' WHERE id = $1")
        .bind(stale)
        .execute(&pool)
        .await
        .expect("backdate");

    let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let failed = repos
        .fail_stale_jobs(cutoff, "lease expired")
        .await
        .expect("sweep");
    assert_eq!(failed, vec![stale]);

    let stale = repos.find_job(stale).await.expect("find").expect("job");
    assert_eq!(stale.status, JobStatus::Failed);
    let fresh = repos.find_job(fresh).await.expect("find").expect("job");
    assert_eq!(fresh.status, JobStatus::Processing);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn documents_and_audit_round_trip(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool.clone()));
    let id = repos
        .create_document(NewDocumentRecord {
            name: "contract.docx".to_string(),
            ext: "docx".to_string(),
            stored_path: "2026/01/01/x-contract.docx".to_string(),
            mapping: None,
        })
        .await
        .expect("create");

    repos
        .update_status(&id, DocumentStatus::Processing)
        .await
        .expect("processing");
    repos
        .record_artifact(&id, "2026/01/01/y-contract.pdf")
        .await
        .expect("artifact");
    repos
        .update_mapping(&id, json!({ "name": "[name]" }))
        .await
        .expect("mapping");

    let document = repos.find_document(&id).await.expect("find").expect("doc");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(
        document.artifact_path.as_deref(),
        Some("2026/01/01/y-contract.pdf")
    );
    assert_eq!(document.mapping, Some(json!({ "name": "[name]" })));
    assert!(matches!(
        repos
            .update_status("no-such-document", DocumentStatus::Failed)
            .await,
        Err(RepoError::NotFound)
    ));

    AuditService::new(repos.clone())
        .record(AuditEvent::system("DOCUMENT_GENERATED", "document", &id))
        .await
        .expect("audit");
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE entity_id = $1")
        .bind(&id)
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}
