use serde::{Deserialize, Serialize};

use crate::domain::types::OutputFormat;

pub const DEFAULT_SOURCE_EXTENSION: &str = "docx";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocumentPayload {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
}

impl ProcessDocumentPayload {
    pub fn extension(&self) -> &str {
        self.ext
            .as_deref()
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_SOURCE_EXTENSION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTemplatePayload {
    pub document_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}
