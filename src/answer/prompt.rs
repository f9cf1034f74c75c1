use super::generation::GenerationRequest;
use crate::model::{Citation, FragmentModality};

/// Answer text returned when retrieval finds nothing.
pub const NO_RELEVANT_CONTENT: &str =
    "I don't know based on the indexed documents. Please upload a document or try a different query.";

const SYSTEM_PROMPT: &str = "You answer questions about uploaded documents using only the \
context provided. The context holds text passages, OCR output, and image captions taken from \
PDF pages or standalone images. If the answer is not clearly present, reply with \
'I don't know based on the indexed documents.' Cite sources as (source: FILENAME p.PAGE). \
When the context describes charts or images, explain what they show in plain language. \
Keep answers short and factual.";

fn modality_tag(modality: FragmentModality) -> &'static str {
    match modality {
        FragmentModality::Text => "[TEXT]",
        FragmentModality::OcrText => "[OCR]",
        FragmentModality::Image => "[IMAGE]",
    }
}

fn source_label(citation: &Citation) -> String {
    match citation.page {
        Some(page) => format!("{} p.{page}", citation.document_name),
        None => citation.document_name.clone(),
    }
}

/// Context block listing each citation's modality, source, and excerpt.
pub(crate) fn context_block(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(|citation| {
            format!(
                "{} (source: {}, distance={:.3})\n{}",
                modality_tag(citation.modality),
                source_label(citation),
                citation.distance,
                citation.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn build_request(question: &str, citations: &[Citation]) -> GenerationRequest {
    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: format!(
            "Question: {}\n\nContext:\n{}",
            question.trim(),
            context_block(citations)
        ),
    }
}

/// Answer assembled from excerpts when no generator is available.
pub(crate) fn extractive_answer(citations: &[Citation]) -> String {
    let mut lines = vec!["Relevant excerpts from the indexed documents:".to_string()];
    lines.extend(citations.iter().map(|citation| {
        format!(
            "- {} (source: {})",
            citation.excerpt.replace('\n', " "),
            source_label(citation)
        )
    }));
    lines.join("\n")
}
