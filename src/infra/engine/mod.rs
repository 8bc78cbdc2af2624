//! Document engine backed by an external headless office converter.

mod codec;
mod converter;
mod license;

pub use codec::{decode, encode_html, encode_json};
pub use converter::{LICENSE_ENV_VAR, METRIC_CONVERT_MS, PdfConverter};
pub use license::{ActiveLicense, LicenseRegistry};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::engine::{DocumentEngine, EngineError};
use crate::application::scanner::scan_document;
use crate::application::template::{RenderError, RenderOptions, render_document};
use crate::config::EngineSettings;
use crate::domain::types::{EngineKind, OutputFormat, SourceFormat};

#[derive(Debug, Clone)]
pub struct OfficeEngine {
    licenses: Arc<LicenseRegistry>,
    converter: PdfConverter,
}

impl OfficeEngine {
    pub fn new(licenses: Arc<LicenseRegistry>, converter: PdfConverter) -> Self {
        Self {
            licenses,
            converter,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            Arc::new(LicenseRegistry::new(settings.license_dir.clone())),
            PdfConverter::new(settings.converter_path.clone(), settings.work_dir.clone()),
        )
    }

    /// Path of the active license for `kind`. Only the first activation
    /// reads the license file, on the blocking pool.
    async fn activate(&self, kind: EngineKind) -> Result<Option<PathBuf>, EngineError> {
        if let Some(active) = self.licenses.active(kind) {
            return Ok(Some(active.path.clone()));
        }

        let licenses = Arc::clone(&self.licenses);
        tokio::task::spawn_blocking(move || {
            licenses
                .ensure(kind)
                .map(|active| active.map(|license| license.path.clone()))
        })
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err)))?
    }

    async fn run_converter(
        &self,
        bytes: Vec<u8>,
        ext: &'static str,
        kind: EngineKind,
    ) -> Result<Vec<u8>, EngineError> {
        let license = self.activate(kind).await?;
        let converter = self.converter.clone();
        tokio::task::spawn_blocking(move || converter.convert(&bytes, ext, license.as_deref()))
            .await
            .map_err(|err| EngineError::Io(std::io::Error::other(err)))?
    }
}

#[async_trait]
impl DocumentEngine for OfficeEngine {
    async fn ensure_licensed(&self, kind: EngineKind) -> Result<(), EngineError> {
        self.activate(kind).await.map(|_| ())
    }

    async fn convert_to_pdf(
        &self,
        bytes: &[u8],
        format: SourceFormat,
    ) -> Result<Vec<u8>, EngineError> {
        let Some(kind) = format.engine_kind() else {
            debug!(
                target = "infra::engine",
                op = "engine::convert_to_pdf",
                "source is already pdf"
            );
            return Ok(bytes.to_vec());
        };

        self.run_converter(bytes.to_vec(), format.extension(), kind)
            .await
    }

    async fn render_template(
        &self,
        bytes: &[u8],
        data: &Value,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        self.ensure_licensed(EngineKind::Words).await?;

        let document = decode(bytes)?;
        let rendered = render_document(document, data, options.preserve_placeholders)?;

        match options.output {
            OutputFormat::Json => Ok(encode_json(&rendered)?),
            OutputFormat::Html => Ok(encode_html(&rendered)),
            OutputFormat::Pdf => {
                let html = encode_html(&rendered);
                Ok(self
                    .run_converter(html, SourceFormat::Html.extension(), EngineKind::Words)
                    .await?)
            }
        }
    }

    fn scan_fields(&self, bytes: &[u8]) -> BTreeSet<String> {
        match decode(bytes) {
            Ok(document) => scan_document(&document),
            Err(err) => {
                debug!(
                    target = "infra::engine",
                    op = "engine::scan_fields",
                    error = %err,
                    "template could not be decoded; no fields"
                );
                BTreeSet::new()
            }
        }
    }
}
