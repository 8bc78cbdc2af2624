//! Capability interface to the document engine.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::application::template::{RenderError, RenderOptions};
use crate::domain::types::{EngineKind, SourceFormat};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Unsupported(String),
    #[error("document could not be decoded: {0}")]
    Decode(String),
    #[error("engine i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("document converter unavailable: {0}")]
    ConverterUnavailable(std::io::Error),
    #[error("document conversion failed (exit {exit_code:?}): {stderr}")]
    Conversion {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("converter finished without producing output")]
    MissingOutput,
    #[error("{} license could not be activated: {message}", kind.as_str())]
    License { kind: EngineKind, message: String },
}

impl EngineError {
    pub fn unsupported_format() -> Self {
        Self::Unsupported("Unsupported file type".to_string())
    }
}

/// Document conversion, rendering and scanning.
///
/// Implementations may use temporary files, but every path they create must
/// be released before the call returns, whichever way it returns.
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Activate the license for `kind`. Idempotent; memoized after success.
    async fn ensure_licensed(&self, kind: EngineKind) -> Result<(), EngineError>;

    async fn convert_to_pdf(&self, bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, EngineError>;

    async fn render_template(
        &self,
        bytes: &[u8],
        data: &Value,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError>;

    /// Keys referenced by the template. Bytes that cannot be decoded have none.
    fn scan_fields(&self, bytes: &[u8]) -> BTreeSet<String>;
}
