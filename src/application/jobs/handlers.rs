use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    application::{
        audit::{ACTION_DOCUMENT_PROCESSED, ACTION_TEMPLATE_GENERATED, AuditEvent},
        engine::EngineError,
        template::RenderOptions,
    },
    domain::{
        entities::{DocumentRecord, JobRecord},
        types::{DocumentStatus, JobStatus, JobType, SourceFormat},
    },
    infra::storage::{StoredArtifact, artifact_name},
};

use super::{
    JobError,
    context::JobWorkerContext,
    payloads::{GenerateTemplatePayload, ProcessDocumentPayload},
};

/// Run the handler matching `job.job_type` and return the job result.
pub async fn dispatch(ctx: &JobWorkerContext, job: &JobRecord) -> Result<Value, JobError> {
    let job_type = JobType::try_from(job.job_type.as_str())
        .map_err(|_| JobError::Validation(format!("unknown job type `{}`", job.job_type)))?;

    match job_type {
        JobType::ProcessDocument => process_document(ctx, job).await,
        JobType::GenerateTemplate => generate_template(ctx, job).await,
    }
}

/// Convert a stored document to PDF.
pub async fn process_document(ctx: &JobWorkerContext, job: &JobRecord) -> Result<Value, JobError> {
    let payload: ProcessDocumentPayload = parse_payload(job)?;
    let format = SourceFormat::from_extension(payload.extension())
        .ok_or_else(EngineError::unsupported_format)?;

    let document = load_document(ctx, &payload.document_id).await?;
    ctx.documents
        .update_status(&document.id, DocumentStatus::Processing)
        .await?;

    let source = ctx.storage.read(&document.stored_path).await?;
    let pdf = ctx.engine.convert_to_pdf(&source, format).await?;
    let artifact = ctx
        .storage
        .store(&artifact_name(&document.name, "pdf"), Bytes::from(pdf))
        .await?;
    record_artifact(ctx, job, &document, &artifact).await?;

    ctx.audit
        .record_quietly(
            AuditEvent::system(ACTION_DOCUMENT_PROCESSED, "document", &document.id).with_payload(
                &json!({ "jobId": job.id, "details": "Processed via worker" }),
            ),
        )
        .await;

    info!(
        target = "application::jobs::process_document",
        job_id = %job.id,
        document_id = %document.id,
        format = format.extension(),
        artifact = %artifact.stored_path,
        "document converted"
    );

    Ok(json!({
        "success": true,
        "artifactPath": artifact.stored_path,
        "checksum": artifact.checksum,
    }))
}

/// Render a stored template with the payload data.
pub async fn generate_template(ctx: &JobWorkerContext, job: &JobRecord) -> Result<Value, JobError> {
    let payload: GenerateTemplatePayload = parse_payload(job)?;
    let output = payload.format.unwrap_or_default();

    let document = load_document(ctx, &payload.document_id).await?;
    ctx.documents
        .update_status(&document.id, DocumentStatus::Processing)
        .await?;

    let template = ctx.storage.read(&document.stored_path).await?;
    let rendered = ctx
        .engine
        .render_template(&template, &payload.data, &RenderOptions::final_render(output))
        .await?;
    let artifact = ctx
        .storage
        .store(
            &artifact_name(&document.name, output.extension()),
            Bytes::from(rendered),
        )
        .await?;
    record_artifact(ctx, job, &document, &artifact).await?;

    if let Some(mapping) = merge_mapping(document.mapping.as_ref(), &payload.data) {
        ctx.documents.update_mapping(&document.id, mapping).await?;
    }

    ctx.audit
        .record_quietly(
            AuditEvent::system(ACTION_TEMPLATE_GENERATED, "document", &document.id).with_payload(
                &json!({ "jobId": job.id, "format": output.as_str() }),
            ),
        )
        .await;

    info!(
        target = "application::jobs::generate_template",
        job_id = %job.id,
        document_id = %document.id,
        format = output.as_str(),
        artifact = %artifact.stored_path,
        "template rendered"
    );

    Ok(json!({
        "success": true,
        "artifactPath": artifact.stored_path,
        "format": output.as_str(),
    }))
}

/// Document id named by a job payload, if any.
pub fn payload_document_id(payload: &Value) -> Option<&str> {
    payload
        .get("documentId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn parse_payload<P: DeserializeOwned>(job: &JobRecord) -> Result<P, JobError> {
    serde_json::from_value(job.payload.clone()).map_err(|err| {
        JobError::Validation(format!(
            "malformed {} payload: {err}",
            job.job_type.as_str()
        ))
    })
}

async fn load_document(ctx: &JobWorkerContext, id: &str) -> Result<DocumentRecord, JobError> {
    ctx.documents
        .find_document(id)
        .await?
        .ok_or_else(|| JobError::DocumentNotFound(id.to_string()))
}

/// Attach `artifact` to the document, unless the job lost its claim while the
/// handler ran. A swept job keeps its document FAILED and the orphaned
/// artifact is removed.
async fn record_artifact(
    ctx: &JobWorkerContext,
    job: &JobRecord,
    document: &DocumentRecord,
    artifact: &StoredArtifact,
) -> Result<(), JobError> {
    let claimed = ctx
        .jobs
        .find_job(job.id)
        .await?
        .is_some_and(|current| current.status == JobStatus::Processing);

    if !claimed {
        if let Err(err) = ctx.storage.delete(&artifact.stored_path).await {
            warn!(
                target = "application::jobs::handlers",
                job_id = %job.id,
                artifact = %artifact.stored_path,
                error = %err,
                "failed to remove orphaned artifact"
            );
        }
        return Err(JobError::ClaimLost(job.id));
    }

    ctx.documents
        .record_artifact(&document.id, &artifact.stored_path)
        .await?;
    Ok(())
}

/// Overlay `data` onto the existing mapping. Non-object data leaves it untouched.
fn merge_mapping(existing: Option<&Value>, data: &Value) -> Option<Value> {
    let incoming = data.as_object()?;
    let mut merged = existing
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    Some(Value::Object(merged))
}
