//! Shared domain enumerations aligned with persisted column values.

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Lifecycle of a queued job. Transitions only move forward:
/// `Pending -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Validate a forward transition and return the new status.
    pub fn transition_to(self, next: JobStatus) -> Result<JobStatus, DomainError> {
        let allowed = matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ProcessDocument,
    GenerateTemplate,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ProcessDocument => "PROCESS_DOCUMENT",
            JobType::GenerateTemplate => "GENERATE_TEMPLATE",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PROCESS_DOCUMENT" => Ok(JobType::ProcessDocument),
            "GENERATE_TEMPLATE" => Ok(JobType::GenerateTemplate),
            _ => Err(()),
        }
    }
}

/// Status carried by a document record, mirroring the outcome of its latest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }
}

impl TryFrom<&str> for DocumentStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(DocumentStatus::Pending),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "COMPLETED" => Ok(DocumentStatus::Completed),
            "FAILED" => Ok(DocumentStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Native engine family. Each kind carries its own licensing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Words,
    Cells,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Words => "words",
            EngineKind::Cells => "cells",
        }
    }

    pub fn license_file_name(self) -> &'static str {
        match self {
            EngineKind::Words => "Words.lic",
            EngineKind::Cells => "Cells.lic",
        }
    }
}

/// Source format tag derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Docx,
    Doc,
    Xlsx,
    Xls,
    Pdf,
    Html,
    Txt,
    Json,
}

impl SourceFormat {
    /// Parse an extension, ignoring case and a leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let normalized = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "docx" => Some(SourceFormat::Docx),
            "doc" => Some(SourceFormat::Doc),
            "xlsx" => Some(SourceFormat::Xlsx),
            "xls" => Some(SourceFormat::Xls),
            "pdf" => Some(SourceFormat::Pdf),
            "html" | "htm" => Some(SourceFormat::Html),
            "txt" => Some(SourceFormat::Txt),
            "json" => Some(SourceFormat::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Docx => "docx",
            SourceFormat::Doc => "doc",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Xls => "xls",
            SourceFormat::Pdf => "pdf",
            SourceFormat::Html => "html",
            SourceFormat::Txt => "txt",
            SourceFormat::Json => "json",
        }
    }

    /// Engine responsible for converting this format. `None` means the bytes
    /// are already in the target format.
    pub fn engine_kind(self) -> Option<EngineKind> {
        match self {
            SourceFormat::Pdf => None,
            SourceFormat::Xlsx | SourceFormat::Xls => Some(EngineKind::Cells),
            SourceFormat::Docx
            | SourceFormat::Doc
            | SourceFormat::Html
            | SourceFormat::Txt
            | SourceFormat::Json => Some(EngineKind::Words),
        }
    }
}

/// Serialization target for rendered templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    Html,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl TryFrom<&str> for OutputFormat {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "html" => Ok(OutputFormat::Html),
            "json" => Ok(OutputFormat::Json),
            _ => Err(()),
        }
    }
}
