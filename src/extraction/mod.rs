//! Fragment extraction: turns an uploaded document into an ordered stream of fragments.
//!
//! Text documents (plain text, Markdown or Word `.docx`) are split with
//! [`chunking::TextSplitter`]. Images become one `image`
//! fragment plus an `ocr_text` fragment when OCR finds text. PDFs yield text fragments per
//! page, one `image` fragment per embedded image, and `ocr_text` fragments for pages whose
//! extractable text is too short to be useful (scanned pages). Failures are reported per
//! page or image so the rest of the document still flows through.

pub mod chunking;
mod docx;
pub(crate) mod image;
pub mod ocr;
pub mod pdf;

use crate::model::{Document, DocumentId, DocumentKind, Fragment, FragmentContent, FragmentModality};
use async_stream::stream;
use chunking::TextSplitter;
use futures_core::stream::Stream;
use ocr::OcrEngine;
use pdf::{PdfPage, PdfReader};
use serde::Serialize;
use std::sync::Arc;

/// Pages with fewer non-whitespace characters than this are treated as scanned and OCR'd.
pub const MIN_TEXT_CHARS_FOR_NO_OCR: usize = 30;

/// Stage at which a unit of extraction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStage {
    /// Reading text out of the document or page.
    TextParse,
    /// Decoding an image.
    ImageDecode,
    /// Running OCR on an image.
    Ocr,
}

impl std::fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextParse => f.write_str("text-parse"),
            Self::ImageDecode => f.write_str("image-decode"),
            Self::Ocr => f.write_str("ocr"),
        }
    }
}

/// A recoverable failure for one page or image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("extraction failed for document {document_id} (page {page:?}) at {stage}: {message}")]
pub struct ExtractionError {
    /// Document being extracted.
    pub document_id: DocumentId,
    /// Page the failure belongs to, when known.
    pub page: Option<u32>,
    /// Failing stage.
    pub stage: ExtractionStage,
    /// Human readable cause.
    pub message: String,
}

impl ExtractionError {
    fn new(
        document_id: DocumentId,
        page: Option<u32>,
        stage: ExtractionStage,
        message: impl ToString,
    ) -> Self {
        Self {
            document_id,
            page,
            stage,
            message: message.to_string(),
        }
    }
}

/// Item produced by [`FragmentExtractor::extract`].
pub type ExtractionItem = Result<Fragment, ExtractionError>;

/// Converts documents into fragments.
#[derive(Clone)]
pub struct FragmentExtractor {
    splitter: TextSplitter,
    ocr: Arc<dyn OcrEngine>,
    pdf_reader: Arc<dyn PdfReader>,
}

impl FragmentExtractor {
    /// Create an extractor from its collaborators.
    pub fn new(
        splitter: TextSplitter,
        ocr: Arc<dyn OcrEngine>,
        pdf_reader: Arc<dyn PdfReader>,
    ) -> Self {
        Self {
            splitter,
            ocr,
            pdf_reader,
        }
    }

    /// Stream the fragments of `document` in document order.
    ///
    /// The stream is finite and yields an error item for each page or image that fails; it
    /// never stops early because of one.
    pub fn extract<'a>(
        &'a self,
        document: &'a Document,
        bytes: Vec<u8>,
    ) -> impl Stream<Item = ExtractionItem> + Send + 'a {
        stream! {
            let mut sequence = 0usize;
            match document.kind {
                DocumentKind::Text => match plain_text(&bytes) {
                    Ok(text) => {
                        for fragment in self.text_fragments(
                            document.id,
                            &text,
                            None,
                            FragmentModality::Text,
                            &mut sequence,
                        ) {
                            yield Ok(fragment);
                        }
                    }
                    Err(error) => {
                        yield Err(ExtractionError::new(
                            document.id,
                            None,
                            ExtractionStage::TextParse,
                            error,
                        ));
                    }
                },
                DocumentKind::Image => {
                    for item in self.image_document(document, &bytes, &mut sequence).await {
                        yield item;
                    }
                }
                DocumentKind::Pdf => match self.read_pdf(document.id, bytes).await {
                    Ok(pages) => {
                        tracing::debug!(document_id = %document.id, pages = pages.len(), "PDF opened");
                        for page in pages {
                            for item in self.pdf_page(document, page, &mut sequence).await {
                                yield item;
                            }
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                    }
                },
            }
        }
    }

    fn text_fragments(
        &self,
        document_id: DocumentId,
        text: &str,
        page: Option<u32>,
        modality: FragmentModality,
        sequence: &mut usize,
    ) -> Vec<Fragment> {
        self.splitter
            .split(text)
            .into_iter()
            .map(|span| {
                let fragment = Fragment::new(
                    document_id,
                    modality,
                    FragmentContent::Text(span.slice(text).to_string()),
                    page,
                    *sequence,
                    Some(span),
                );
                *sequence += 1;
                fragment
            })
            .collect()
    }

    async fn image_document(
        &self,
        document: &Document,
        bytes: &[u8],
        sequence: &mut usize,
    ) -> Vec<ExtractionItem> {
        let owned = bytes.to_vec();
        let decoded = tokio::task::spawn_blocking(move || {
            image::normalize_to_png(&owned).map_err(|error| error.to_string())
        })
        .await
        .unwrap_or_else(|error| Err(error.to_string()));
        let png = match decoded {
            Ok(png) => png,
            Err(error) => {
                return vec![Err(ExtractionError::new(
                    document.id,
                    None,
                    ExtractionStage::ImageDecode,
                    error,
                ))];
            }
        };

        let mut items = Vec::with_capacity(2);
        let recognized = self.recognize(document.id, None, &png, &mut items).await;
        let caption = recognized
            .clone()
            .unwrap_or_else(|| image::uploaded_image_caption(&document.filename));

        items.push(Ok(Fragment::new(
            document.id,
            FragmentModality::Image,
            FragmentContent::Image { png, caption },
            None,
            next(sequence),
            None,
        )));
        if let Some(text) = recognized {
            items.push(Ok(Fragment::new(
                document.id,
                FragmentModality::OcrText,
                FragmentContent::Text(text),
                None,
                next(sequence),
                None,
            )));
        }
        items
    }

    async fn read_pdf(
        &self,
        document_id: DocumentId,
        bytes: Vec<u8>,
    ) -> Result<Vec<PdfPage>, ExtractionError> {
        let reader = Arc::clone(&self.pdf_reader);
        tokio::task::spawn_blocking(move || reader.read_pages(&bytes))
            .await
            .map_err(|error| {
                ExtractionError::new(document_id, None, ExtractionStage::TextParse, error)
            })?
            .map_err(|error| {
                ExtractionError::new(document_id, None, ExtractionStage::TextParse, error)
            })
    }

    async fn pdf_page(
        &self,
        document: &Document,
        page: PdfPage,
        sequence: &mut usize,
    ) -> Vec<ExtractionItem> {
        let number = page.number;
        let mut items = Vec::new();

        let text = match page.text {
            Ok(text) => text,
            Err(message) => {
                items.push(Err(ExtractionError::new(
                    document.id,
                    Some(number),
                    ExtractionStage::TextParse,
                    message,
                )));
                String::new()
            }
        };
        let scanned = text.chars().filter(|c| !c.is_whitespace()).count() < MIN_TEXT_CHARS_FOR_NO_OCR;
        items.extend(
            self.text_fragments(document.id, &text, Some(number), FragmentModality::Text, sequence)
                .into_iter()
                .map(Ok),
        );
        if scanned && page.images.is_empty() {
            items.push(Err(ExtractionError::new(
                document.id,
                Some(number),
                ExtractionStage::Ocr,
                "page has too little text and draws no image to OCR",
            )));
        }

        let mut page_ocr = Vec::new();
        for image in page.images {
            let png = match image {
                Ok(png) => png,
                Err(message) => {
                    items.push(Err(ExtractionError::new(
                        document.id,
                        Some(number),
                        ExtractionStage::ImageDecode,
                        message,
                    )));
                    continue;
                }
            };
            let recognized = self.recognize(document.id, Some(number), &png, &mut items).await;
            let caption = recognized
                .clone()
                .unwrap_or_else(|| image::pdf_image_caption(&document.filename, number));
            items.push(Ok(Fragment::new(
                document.id,
                FragmentModality::Image,
                FragmentContent::Image { png, caption },
                Some(number),
                next(sequence),
                None,
            )));
            if scanned {
                page_ocr.extend(recognized);
            }
        }

        if !page_ocr.is_empty() {
            let recognized = page_ocr.join("\n\n");
            items.extend(
                self.text_fragments(
                    document.id,
                    &recognized,
                    Some(number),
                    FragmentModality::OcrText,
                    sequence,
                )
                .into_iter()
                .map(Ok),
            );
        }
        items
    }

    /// Run OCR once; failures are pushed onto `items` and reported as no text.
    async fn recognize(
        &self,
        document_id: DocumentId,
        page: Option<u32>,
        png: &[u8],
        items: &mut Vec<ExtractionItem>,
    ) -> Option<String> {
        match self.ocr.recognize(png).await {
            Ok(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Err(error) => {
                tracing::warn!(%document_id, ?page, error = %error, "OCR failed");
                items.push(Err(ExtractionError::new(
                    document_id,
                    page,
                    ExtractionStage::Ocr,
                    error,
                )));
                None
            }
        }
    }
}

/// Body text of a text-kind upload: Word archives are unpacked, anything else is read as UTF-8.
fn plain_text(bytes: &[u8]) -> Result<String, docx::DocxError> {
    if docx::is_docx(bytes) {
        docx::docx_text(bytes)
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn next(sequence: &mut usize) -> usize {
    let current = *sequence;
    *sequence += 1;
    current
}
