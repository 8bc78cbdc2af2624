//! Synchronous template path: preview, one-shot generation and field scanning.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::application::audit::{ACTION_DOCUMENT_GENERATED, AuditEvent, AuditService};
use crate::application::engine::DocumentEngine;
use crate::application::error::AppError;
use crate::application::repos::DocumentsRepo;
use crate::application::scanner::mapping_skeleton;
use crate::application::template::RenderOptions;
use crate::domain::entities::DocumentRecord;
use crate::domain::types::OutputFormat;
use crate::infra::storage::DocumentStorage;

const SOURCE: &str = "application::templates";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub fields: BTreeSet<String>,
    pub mapping: Value,
    /// Whether the mapping skeleton was written because the document had none.
    pub seeded: bool,
}

#[derive(Clone)]
pub struct TemplateService {
    documents: Arc<dyn DocumentsRepo>,
    audit: AuditService,
    engine: Arc<dyn DocumentEngine>,
    storage: Arc<DocumentStorage>,
}

impl TemplateService {
    pub fn new(
        documents: Arc<dyn DocumentsRepo>,
        audit: AuditService,
        engine: Arc<dyn DocumentEngine>,
        storage: Arc<DocumentStorage>,
    ) -> Self {
        Self {
            documents,
            audit,
            engine,
            storage,
        }
    }

    /// Render with unresolved tags left visible so authors can see what is missing.
    pub async fn preview(
        &self,
        document_id: &str,
        data: &Value,
        format: OutputFormat,
    ) -> Result<Vec<u8>, AppError> {
        let document = self.load(document_id).await?;
        let template = self.storage.read(&document.stored_path).await?;
        let rendered = self
            .engine
            .render_template(&template, data, &RenderOptions::preview(format))
            .await?;

        info!(
            target = SOURCE,
            op = "template::preview",
            document_id = %document_id,
            format = format.as_str(),
            bytes = rendered.len(),
            "template preview rendered"
        );
        Ok(rendered)
    }

    pub async fn generate(
        &self,
        document_id: &str,
        data: &Value,
        format: OutputFormat,
    ) -> Result<Vec<u8>, AppError> {
        let document = self.load(document_id).await?;
        let template = self.storage.read(&document.stored_path).await?;
        let rendered = self
            .engine
            .render_template(&template, data, &RenderOptions::final_render(format))
            .await?;

        self.audit
            .record_quietly(
                AuditEvent::system(ACTION_DOCUMENT_GENERATED, "document", document_id)
                    .with_payload(&json!({ "format": format.as_str() })),
            )
            .await;

        info!(
            target = SOURCE,
            op = "template::generate",
            document_id = %document_id,
            format = format.as_str(),
            bytes = rendered.len(),
            "document generated"
        );
        Ok(rendered)
    }

    /// Discover the template's fields, seeding the mapping on first scan.
    pub async fn scan(&self, document_id: &str) -> Result<ScanResult, AppError> {
        let document = self.load(document_id).await?;
        let template = self.storage.read(&document.stored_path).await?;
        let fields = self.engine.scan_fields(&template);

        let existing = document
            .mapping
            .filter(|mapping| mapping.as_object().is_some_and(|map| !map.is_empty()));

        let (mapping, seeded) = match existing {
            Some(mapping) => (mapping, false),
            None => {
                let skeleton = mapping_skeleton(&fields);
                self.documents
                    .update_mapping(document_id, skeleton.clone())
                    .await?;
                (skeleton, true)
            }
        };

        Ok(ScanResult {
            fields,
            mapping,
            seeded,
        })
    }

    async fn load(&self, id: &str) -> Result<DocumentRecord, AppError> {
        self.documents
            .find_document(id)
            .await?
            .ok_or(AppError::NotFound)
    }
}
