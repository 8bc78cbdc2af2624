use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::application::repos::{AuditRepo, RepoError};
use crate::domain::entities::AuditLogRecord;

pub const ACTION_DOCUMENT_PROCESSED: &str = "DOCUMENT_PROCESSED_ASYNC";
pub const ACTION_TEMPLATE_GENERATED: &str = "TEMPLATE_GENERATED_ASYNC";
pub const ACTION_DOCUMENT_GENERATED: &str = "DOCUMENT_GENERATED";
pub const ACTION_JOB_FAILED: &str = "JOB_FAILED";
pub const ACTION_JOB_RECOVERED: &str = "JOB_LEASE_EXPIRED";

/// One state transition worth keeping in the audit trail.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: String,
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn system(action: &'static str, entity_type: &'static str, entity_id: impl ToString) -> Self {
        Self {
            actor: "system".to_string(),
            action,
            entity_type,
            entity_id: Some(entity_id.to_string()),
            payload: None,
        }
    }

    pub fn with_payload<S: Serialize>(mut self, payload: &S) -> Self {
        self.payload = serde_json::to_value(payload).ok();
        self
    }
}

/// Append-only audit recorder.
#[derive(Clone)]
pub struct AuditService {
    repo: Arc<dyn AuditRepo>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepo>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, event: AuditEvent) -> Result<(), RepoError> {
        let payload_text = match event.payload.as_ref() {
            Some(value) => Some(serde_json::to_string(value).map_err(RepoError::from_persistence)?),
            None => None,
        };

        let record = AuditLogRecord {
            id: Uuid::new_v4(),
            actor: event.actor,
            action: event.action.to_string(),
            entity_type: event.entity_type.to_string(),
            entity_id: event.entity_id,
            payload_text,
            created_at: OffsetDateTime::now_utc(),
        };

        self.repo.append_log(record).await
    }

    /// Record `event`, logging instead of returning on failure.
    pub async fn record_quietly(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(err) = self.record(event).await {
            error!(
                target = "application::audit",
                action,
                error = %err,
                "failed to append audit log"
            );
        }
    }
}
