//! Answer composition: merge ranked hits, cite them, and delegate prose to a generator.

pub mod generation;
mod prompt;

pub use generation::{AnswerGenerator, GenerationError, GenerationRequest, build_generator};
pub use prompt::NO_RELEVANT_CONTENT;

use crate::index::ScoredRecord;
use crate::model::{Answer, AnswerOutcome, Citation, FragmentModality};
use crate::router::Intent;
use std::collections::HashSet;
use std::sync::Arc;

/// Builds [`Answer`]s from per-partition search results.
#[derive(Clone)]
pub struct AnswerComposer {
    generator: Option<Arc<dyn AnswerGenerator>>,
    max_context_fragments: usize,
}

impl AnswerComposer {
    /// Create a composer; `generator` may be absent for extractive-only answers.
    pub fn new(generator: Option<Arc<dyn AnswerGenerator>>, max_context_fragments: usize) -> Self {
        Self {
            generator,
            max_context_fragments: max_context_fragments.max(1),
        }
    }

    /// Compose an answer from `ranked`, one list per searched partition in routing order.
    pub async fn compose(
        &self,
        question: &str,
        intent: Intent,
        ranked: Vec<Vec<ScoredRecord>>,
    ) -> Answer {
        let hits = merge_ranked(intent, ranked, self.max_context_fragments);
        if hits.is_empty() {
            tracing::info!(?intent, "No relevant fragments; skipping generation");
            return Answer {
                text: NO_RELEVANT_CONTENT.to_string(),
                intent,
                citations: Vec::new(),
                outcome: AnswerOutcome::NoRelevantContent,
            };
        }

        let citations: Vec<Citation> = hits.into_iter().map(cite).collect();

        if let Some(generator) = &self.generator {
            match generator
                .generate(prompt::build_request(question, &citations))
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    return Answer {
                        text,
                        intent,
                        citations,
                        outcome: AnswerOutcome::Generated,
                    };
                }
                Ok(_) => {
                    tracing::warn!("Generator returned empty text; falling back to extractive");
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "Answer generation failed; falling back to extractive"
                    );
                }
            }
        }

        Answer {
            text: prompt::extractive_answer(&citations),
            intent,
            citations,
            outcome: AnswerOutcome::Extractive,
        }
    }
}

/// Concatenate (or, for exploratory questions, interleave) ranked lists, keep the first
/// occurrence of each fragment, and cap the result at `limit`.
pub(crate) fn merge_ranked(
    intent: Intent,
    ranked: Vec<Vec<ScoredRecord>>,
    limit: usize,
) -> Vec<ScoredRecord> {
    let ordered: Vec<ScoredRecord> = match intent {
        Intent::Exploratory => interleave(ranked),
        Intent::Textual | Intent::Visual => ranked.into_iter().flatten().collect(),
    };

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|hit| seen.insert(hit.record.fragment_id))
        .take(limit)
        .collect()
}

fn interleave(ranked: Vec<Vec<ScoredRecord>>) -> Vec<ScoredRecord> {
    let total = ranked.iter().map(Vec::len).sum();
    let mut iterators: Vec<_> = ranked.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::with_capacity(total);
    while merged.len() < total {
        for iterator in &mut iterators {
            if let Some(hit) = iterator.next() {
                merged.push(hit);
            }
        }
    }
    merged
}

fn cite(hit: ScoredRecord) -> Citation {
    let record = hit.record;
    let asset_path = (record.modality == FragmentModality::Image)
        .then(|| format!("/assets/{}", record.fragment_id));
    Citation {
        fragment_id: record.fragment_id,
        document_id: record.document_id,
        document_name: record.document_name,
        page: record.page,
        modality: record.modality,
        excerpt: record.excerpt,
        distance: hit.distance,
        asset_path,
    }
}
