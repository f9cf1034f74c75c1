//! Core data model shared by the ingestion and query paths.

use crate::extraction::chunking::TextSpan;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier assigned to each uploaded document.
pub type DocumentId = Uuid;
/// Identifier assigned to each extracted fragment.
pub type FragmentId = Uuid;

/// Boundary errors raised before any ingestion or retrieval work starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The question was empty or whitespace only.
    #[error("question must not be empty")]
    EmptyQuery,
    /// The uploaded payload contained no bytes.
    #[error("uploaded document '{0}' is empty")]
    EmptyDocument(String),
    /// The declared or sniffed modality is not supported.
    #[error("unsupported document modality: {0}")]
    UnsupportedModality(String),
}

/// Modality declared for (or sniffed from) an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Plain UTF-8 text.
    Text,
    /// A raster image (PNG, JPEG).
    Image,
    /// A PDF with text, images, or both.
    Pdf,
}

impl DocumentKind {
    /// Resolve a document kind from an explicit declaration, the filename, or magic bytes.
    pub fn detect(
        declared: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Self, ValidationError> {
        if let Some(value) = declared.map(str::trim).filter(|value| !value.is_empty()) {
            return value
                .parse()
                .map_err(|()| ValidationError::UnsupportedModality(value.to_string()));
        }

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("pdf") => return Ok(Self::Pdf),
            Some("png" | "jpg" | "jpeg") => return Ok(Self::Image),
            Some("txt" | "md" | "text" | "docx") => return Ok(Self::Text),
            _ => {}
        }

        if bytes.starts_with(b"%PDF") {
            Ok(Self::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        {
            Ok(Self::Image)
        } else if std::str::from_utf8(bytes).is_ok() {
            Ok(Self::Text)
        } else {
            Err(ValidationError::UnsupportedModality(filename.to_string()))
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" | "docx" => Ok(Self::Text),
            "image" | "png" | "jpg" | "jpeg" => Ok(Self::Image),
            "pdf" => Ok(Self::Pdf),
            _ => Err(()),
        }
    }
}

/// One uploaded artifact. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: DocumentId,
    /// Declared or sniffed modality.
    pub kind: DocumentKind,
    /// Original filename supplied at upload.
    pub filename: String,
    /// Upload timestamp (RFC3339, UTC).
    pub uploaded_at: String,
}

impl Document {
    /// Create a new document record stamped with the current time.
    pub fn new(kind: DocumentKind, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            filename: filename.into(),
            uploaded_at: current_timestamp_rfc3339(),
        }
    }
}

/// Modality tag carried by fragments and embedding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentModality {
    /// A span of extractable text.
    Text,
    /// An image, embedded through its caption.
    Image,
    /// Text recognised by OCR.
    OcrText,
}

impl FragmentModality {
    /// Index partition holding records of this modality.
    pub fn partition(self) -> Partition {
        match self {
            Self::Text | Self::OcrText => Partition::Text,
            Self::Image => Partition::Image,
        }
    }

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::OcrText => "ocr_text",
        }
    }
}

impl std::fmt::Display for FragmentModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-modality index partition. Vectors from different partitions are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Holds `text` and `ocr_text` records.
    Text,
    /// Holds `image` records.
    Image,
}

impl Partition {
    /// Both partitions, text first.
    pub const ALL: [Partition; 2] = [Partition::Text, Partition::Image];
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// Payload of a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentContent {
    /// Text content (a span of the source, or OCR output).
    Text(String),
    /// A PNG-encoded image together with the caption used to embed it.
    Image {
        /// PNG bytes.
        png: Vec<u8>,
        /// OCR-derived or synthesized caption.
        caption: String,
    },
}

impl FragmentContent {
    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Image { caption, .. } => caption,
        }
    }
}

/// Atomic unit of retrievable content derived from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Unique identifier.
    pub id: FragmentId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Modality tag.
    pub modality: FragmentModality,
    /// Raw content.
    pub content: FragmentContent,
    /// 1-based page number for PDF fragments.
    pub page: Option<u32>,
    /// Order within the document.
    pub sequence: usize,
    /// Location of text spans within the source text.
    pub span: Option<TextSpan>,
    /// Creation timestamp (RFC3339, UTC).
    pub created_at: String,
}

impl Fragment {
    pub(crate) fn new(
        document_id: DocumentId,
        modality: FragmentModality,
        content: FragmentContent,
        page: Option<u32>,
        sequence: usize,
        span: Option<TextSpan>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            modality,
            content,
            page,
            sequence,
            span,
            created_at: current_timestamp_rfc3339(),
        }
    }
}

/// A fragment's vector plus the metadata needed to cite it without re-reading the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Source fragment.
    pub fragment_id: FragmentId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Original filename of the owning document.
    pub document_name: String,
    /// Modality tag of the source fragment.
    pub modality: FragmentModality,
    /// Trimmed text or caption shown in citations and prompts.
    pub excerpt: String,
    /// Embedding vector (L2-normalised).
    pub vector: Vec<f32>,
    /// 1-based page number, if any.
    pub page: Option<u32>,
    /// Order of the fragment within its document.
    pub sequence: usize,
    /// SHA-256 of the embedded text.
    pub content_hash: String,
}

/// Pointer from an answer back to the fragment that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Cited fragment.
    pub fragment_id: FragmentId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Original filename.
    pub document_name: String,
    /// 1-based page number, if any.
    pub page: Option<u32>,
    /// Modality of the cited fragment.
    pub modality: FragmentModality,
    /// Excerpt used as context.
    pub excerpt: String,
    /// Distance to the question within the fragment's partition.
    pub distance: f32,
    /// Relative URL of the raw image for `image` citations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<String>,
}

/// How the answer text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Written by the generation service.
    Generated,
    /// Assembled from excerpts because generation was unavailable.
    Extractive,
    /// Retrieval found nothing; no generation call was made.
    NoRelevantContent,
}

/// Composed response to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text.
    pub text: String,
    /// Retrieval intent chosen by the router.
    pub intent: crate::router::Intent,
    /// Citations in context order.
    pub citations: Vec<Citation>,
    /// How `text` was produced.
    pub outcome: AnswerOutcome,
}

impl Answer {
    /// True for the explicit empty-result answer.
    pub fn is_no_relevant_content(&self) -> bool {
        self.outcome == AnswerOutcome::NoRelevantContent
    }
}

/// Current timestamp formatted for storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
