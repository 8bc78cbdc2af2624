#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use docflow::application::audit::AuditService;
use docflow::application::engine::{DocumentEngine, EngineError};
use docflow::application::jobs::JobWorkerContext;
use docflow::application::repos::{
    AuditRepo, DocumentsRepo, JobsRepo, NewDocumentRecord, RepoError,
};
use docflow::application::scanner::scan_document;
use docflow::application::template::{RenderError, RenderOptions, render_document};
use docflow::domain::entities::{AuditLogRecord, DocumentRecord};
use docflow::domain::types::{DocumentStatus, EngineKind, OutputFormat, SourceFormat};
use docflow::infra::engine::{decode, encode_html, encode_json};
use docflow::infra::memory::MemoryJobStore;
use docflow::infra::storage::DocumentStorage;

#[derive(Default)]
pub struct MemoryDocuments {
    documents: Mutex<HashMap<String, DocumentRecord>>,
}

impl MemoryDocuments {
    pub async fn get(&self, id: &str) -> DocumentRecord {
        self.documents
            .lock()
            .await
            .get(id)
            .cloned()
            .expect("document exists")
    }

    /// Register a document under a caller-chosen id.
    pub async fn insert(&self, id: &str, document: NewDocumentRecord) -> String {
        let now = OffsetDateTime::now_utc();
        self.documents.lock().await.insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                name: document.name,
                ext: document.ext,
                stored_path: document.stored_path,
                status: DocumentStatus::Pending,
                mapping: document.mapping,
                artifact_path: None,
                created_at: now,
                updated_at: now,
            },
        );
        id.to_string()
    }
}

#[async_trait]
impl DocumentsRepo for MemoryDocuments {
    async fn create_document(&self, document: NewDocumentRecord) -> Result<String, RepoError> {
        Ok(self.insert(&Uuid::new_v4().to_string(), document).await)
    }

    async fn find_document(&self, id: &str) -> Result<Option<DocumentRecord>, RepoError> {
        Ok(self.documents.lock().await.get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), RepoError> {
        let mut documents = self.documents.lock().await;
        let document = documents.get_mut(id).ok_or(RepoError::NotFound)?;
        document.status = status;
        Ok(())
    }

    async fn record_artifact(&self, id: &str, artifact_path: &str) -> Result<(), RepoError> {
        let mut documents = self.documents.lock().await;
        let document = documents.get_mut(id).ok_or(RepoError::NotFound)?;
        document.status = DocumentStatus::Completed;
        document.artifact_path = Some(artifact_path.to_string());
        Ok(())
    }

    async fn update_mapping(&self, id: &str, mapping: Value) -> Result<(), RepoError> {
        let mut documents = self.documents.lock().await;
        let document = documents.get_mut(id).ok_or(RepoError::NotFound)?;
        document.mapping = Some(mapping);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditLogRecord>>,
}

impl MemoryAudit {
    pub async fn actions(&self) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .map(|record| record.action.clone())
            .collect()
    }

    pub async fn records(&self) -> Vec<AuditLogRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditRepo for MemoryAudit {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Engine double: "converts" by prefixing a PDF header and renders through
/// the real substitution pipeline, with PDF output standing in as HTML.
#[derive(Default)]
pub struct FakeEngine {
    pub conversions: Mutex<Vec<SourceFormat>>,
}

pub const FAILING_SOURCE: &[u8] = b"corrupt";

#[async_trait]
impl DocumentEngine for FakeEngine {
    async fn ensure_licensed(&self, _kind: EngineKind) -> Result<(), EngineError> {
        Ok(())
    }

    async fn convert_to_pdf(
        &self,
        bytes: &[u8],
        format: SourceFormat,
    ) -> Result<Vec<u8>, EngineError> {
        self.conversions.lock().await.push(format);
        if bytes == FAILING_SOURCE {
            return Err(EngineError::Conversion {
                exit_code: Some(1),
                stderr: "source is corrupt".to_string(),
            });
        }
        let mut pdf = b"%PDF-1.7\n".to_vec();
        pdf.extend_from_slice(bytes);
        Ok(pdf)
    }

    async fn render_template(
        &self,
        bytes: &[u8],
        data: &Value,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let document = decode(bytes)?;
        let rendered = render_document(document, data, options.preserve_placeholders)?;
        match options.output {
            OutputFormat::Json => Ok(encode_json(&rendered)?),
            OutputFormat::Html | OutputFormat::Pdf => Ok(encode_html(&rendered)),
        }
    }

    fn scan_fields(&self, bytes: &[u8]) -> BTreeSet<String> {
        decode(bytes)
            .map(|document| scan_document(&document))
            .unwrap_or_default()
    }
}

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub documents: Arc<MemoryDocuments>,
    pub audit: Arc<MemoryAudit>,
    pub engine: Arc<FakeEngine>,
    pub storage: Arc<DocumentStorage>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let storage = DocumentStorage::new(dir.path().join("storage")).expect("storage");
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            documents: Arc::new(MemoryDocuments::default()),
            audit: Arc::new(MemoryAudit::default()),
            engine: Arc::new(FakeEngine::default()),
            storage: Arc::new(storage),
            _dir: dir,
        }
    }

    pub fn context(&self) -> JobWorkerContext {
        JobWorkerContext {
            jobs: self.jobs.clone(),
            documents: self.documents.clone(),
            audit: AuditService::new(self.audit.clone()),
            engine: self.engine.clone(),
            storage: self.storage.clone(),
        }
    }

    pub fn audit_service(&self) -> AuditService {
        AuditService::new(self.audit.clone())
    }

    /// Store `bytes` and register a document pointing at them.
    pub async fn upload(&self, name: &str, bytes: &[u8], mapping: Option<Value>) -> String {
        let document = self.stored_document(name, bytes, mapping).await;
        self.documents
            .create_document(document)
            .await
            .expect("create document")
    }

    /// Like [`Harness::upload`], keeping the caller's document id.
    pub async fn upload_as(&self, id: &str, name: &str, bytes: &[u8]) -> String {
        let document = self.stored_document(name, bytes, None).await;
        self.documents.insert(id, document).await
    }

    async fn stored_document(
        &self,
        name: &str,
        bytes: &[u8],
        mapping: Option<Value>,
    ) -> NewDocumentRecord {
        let stored = self
            .storage
            .store(name, Bytes::copy_from_slice(bytes))
            .await
            .expect("store upload");
        let ext = name.rsplit('.').next().unwrap_or("docx").to_string();
        NewDocumentRecord {
            name: name.to_string(),
            ext,
            stored_path: stored.stored_path,
            mapping,
        }
    }

    pub async fn job(&self, id: Uuid) -> docflow::domain::entities::JobRecord {
        self.jobs
            .find_job(id)
            .await
            .expect("find job")
            .expect("job exists")
    }
}
