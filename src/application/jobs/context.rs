use std::sync::Arc;

use crate::{
    application::{
        audit::AuditService,
        engine::DocumentEngine,
        repos::{DocumentsRepo, JobsRepo},
    },
    infra::storage::DocumentStorage,
};

/// Shared context passed to job workers so they can access infrastructure capabilities.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub jobs: Arc<dyn JobsRepo>,
    pub documents: Arc<dyn DocumentsRepo>,
    pub audit: AuditService,
    pub engine: Arc<dyn DocumentEngine>,
    pub storage: Arc<DocumentStorage>,
}
