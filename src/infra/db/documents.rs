use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{DocumentsRepo, NewDocumentRecord, RepoError},
    domain::{entities::DocumentRecord, types::DocumentStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    name: String,
    ext: String,
    stored_path: String,
    status: String,
    mapping: Option<serde_json::Value>,
    artifact_path: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<DocumentRow> for DocumentRecord {
    type Error = RepoError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let status = DocumentStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown document status `{}`", row.status))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            ext: row.ext,
            stored_path: row.stored_path,
            status,
            mapping: row.mapping,
            artifact_path: row.artifact_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn ensure_touched(rows_affected: u64) -> Result<(), RepoError> {
    if rows_affected == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl DocumentsRepo for PostgresRepositories {
    async fn create_document(&self, document: NewDocumentRecord) -> Result<String, RepoError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, ext, stored_path, status, mapping)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(&document.name)
        .bind(&document.ext)
        .bind(&document.stored_path)
        .bind(DocumentStatus::Pending.as_str())
        .bind(document.mapping.as_ref())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn find_document(&self, id: &str) -> Result<Option<DocumentRecord>, RepoError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, name, ext, stored_path, status, mapping, artifact_path,
                   created_at, updated_at
              FROM documents
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(DocumentRecord::try_from).transpose()
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), RepoError> {
        let outcome = sqlx::query(
            "UPDATE documents SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ensure_touched(outcome.rows_affected())
    }

    async fn record_artifact(&self, id: &str, artifact_path: &str) -> Result<(), RepoError> {
        let outcome = sqlx::query(
            r#"
            UPDATE documents
               SET status = $2,
                   artifact_path = $3,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(DocumentStatus::Completed.as_str())
        .bind(artifact_path)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ensure_touched(outcome.rows_affected())
    }

    async fn update_mapping(&self, id: &str, mapping: serde_json::Value) -> Result<(), RepoError> {
        let outcome = sqlx::query(
            "UPDATE documents SET mapping = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(&mapping)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ensure_touched(outcome.rows_affected())
    }
}
