//! Request, report, and error types for the pipeline service.

use crate::answer::GenerationError;
use crate::embedding::{EmbeddingClientError, EmbeddingError};
use crate::extraction::chunking::ChunkingError;
use crate::extraction::{ExtractionError, ExtractionStage};
use crate::index::IndexError;
use crate::model::{DocumentId, DocumentKind, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted while assembling or operating the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request was rejected before any work started.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The text splitter could not be configured.
    #[error("Failed to configure text splitter: {0}")]
    Chunking(#[from] ChunkingError),
    /// The embedding client could not be configured.
    #[error("Failed to configure embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The generation client could not be configured.
    #[error("Failed to configure answer generator: {0}")]
    Generation(#[from] GenerationError),
    /// Index or snapshot operation failed.
    #[error("Index operation failed: {0}")]
    Index(#[from] IndexError),
    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// A document handed to [`crate::pipeline::RagApi::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Original filename, used for modality sniffing and citations.
    pub filename: String,
    /// Explicit modality (`text`, `image`, `pdf`), overriding sniffing.
    pub modality: Option<String>,
}

impl Upload {
    /// Upload whose modality is sniffed from the filename or content.
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            modality: None,
        }
    }

    /// Declare the modality explicitly.
    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }
}

/// A question plus optional retrieval scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language question.
    pub question: String,
    /// Results per partition; defaults depend on the inferred intent.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restrict retrieval to one document.
    #[serde(default)]
    pub document_id: Option<DocumentId>,
    /// Restrict retrieval to the most recently submitted document.
    #[serde(default)]
    pub latest_only: bool,
}

impl QueryRequest {
    /// Question with default scope.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

/// Step at which a fragment was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipStage {
    /// Text could not be parsed out of the document or page.
    TextParse,
    /// An image could not be decoded.
    ImageDecode,
    /// OCR failed on an image.
    Ocr,
    /// The embedding provider failed or rejected the fragment.
    Embedding,
    /// The index refused the record.
    Index,
    /// The ingestion task itself failed.
    Internal,
}

impl From<ExtractionStage> for SkipStage {
    fn from(stage: ExtractionStage) -> Self {
        match stage {
            ExtractionStage::TextParse => Self::TextParse,
            ExtractionStage::ImageDecode => Self::ImageDecode,
            ExtractionStage::Ocr => Self::Ocr,
        }
    }
}

/// A fragment (or unit of extraction) that did not reach the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFragment {
    /// Page the failure belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Failing step.
    pub stage: SkipStage,
    /// Human readable cause.
    pub reason: String,
}

impl SkippedFragment {
    pub(crate) fn extraction(error: &ExtractionError) -> Self {
        Self {
            page: error.page,
            stage: error.stage.into(),
            reason: error.message.clone(),
        }
    }

    pub(crate) fn embedding(page: Option<u32>, error: &EmbeddingError) -> Self {
        Self {
            page,
            stage: SkipStage::Embedding,
            reason: error.to_string(),
        }
    }

    pub(crate) fn index(page: Option<u32>, error: &IndexError) -> Self {
        Self {
            page,
            stage: SkipStage::Index,
            reason: error.to_string(),
        }
    }

    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        Self {
            page: None,
            stage: SkipStage::Internal,
            reason: reason.into(),
        }
    }
}

/// Progress of one ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Document being ingested.
    pub document_id: DocumentId,
    /// Original filename.
    pub filename: String,
    /// Resolved modality.
    pub kind: DocumentKind,
    /// True once every fragment has been attempted. Never reverts.
    pub ready: bool,
    /// Fragments inserted into the index.
    pub indexed: usize,
    /// Fragments dropped, with reasons.
    pub skipped: Vec<SkippedFragment>,
    /// Submission time (RFC3339).
    pub submitted_at: String,
    /// Completion time (RFC3339), once ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Readiness across every known job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallReadiness {
    /// True when no job is still running.
    pub ready: bool,
    /// Jobs submitted since startup.
    pub total_jobs: usize,
    /// Jobs still running.
    pub pending_jobs: usize,
}
