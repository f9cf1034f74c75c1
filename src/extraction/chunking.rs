//! Chunk-size heuristics and lossless semantic splitting.
//!
//! Highlights:
//!
//! - Automatic sizing: derive a token budget from the embedding model's context window and
//!   clamp it to a range that keeps fragments at a few hundred words; callers can override via
//!   `TEXT_SPLITTER_CHUNK_SIZE`.
//! - Semantic boundaries: `semchunk-rs` picks the split points (paragraphs, lines, sentences,
//!   words) and every chunk it returns is located back in the source so fragments carry exact
//!   byte spans.
//! - Overlap: each fragment after the first starts with a token-limited tail of its
//!   predecessor. The non-overlapping parts of consecutive spans tile the input, so the
//!   original text is always recoverable.
//! - Token counting: `tiktoken-rs` for OpenAI and known encodings, whitespace counting for the
//!   local hashed embedder and for models whose tokenizer is unknown.

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

/// Shared token counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 128;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 512;

/// Errors produced while preparing the splitter.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Byte range of one fragment inside its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    /// First byte of the fragment, including overlap carried from the previous fragment.
    pub start: usize,
    /// First byte not shared with the previous fragment.
    pub fresh_start: usize,
    /// Exclusive end.
    pub end: usize,
}

impl TextSpan {
    /// Full fragment text, overlap included.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    /// Fragment text without the overlap prefix.
    pub fn fresh<'a>(&self, text: &'a str) -> &'a str {
        &text[self.fresh_start..self.end]
    }
}

/// Token-budgeted splitter with overlap.
#[derive(Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl std::fmt::Debug for TextSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl TextSplitter {
    /// Build a splitter with an explicit token counter.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
            counter,
        })
    }

    /// Build a splitter sized for the configured embedding model.
    pub fn for_model(
        override_size: Option<usize>,
        overlap: usize,
        provider: EmbeddingProvider,
        model: &str,
        use_safe_defaults: bool,
    ) -> Result<Self, ChunkingError> {
        let chunk_size = determine_chunk_size(override_size, provider, model, use_safe_defaults);
        let counter = build_token_counter(provider, model)?;
        tracing::debug!(
            chunk_size,
            overlap,
            provider = ?provider,
            model,
            "Derived chunk size"
        );
        Self::new(chunk_size, overlap, counter)
    }

    /// Maximum tokens per fragment, overlap included.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into spans. Returns no spans for whitespace-only input.
    pub fn split(&self, text: &str) -> Vec<TextSpan> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let budget = (self.chunk_size - self.overlap).max(1);
        let counter_for_chunker = self.counter.clone();
        let chunker = Chunker::new(
            budget,
            Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
        );
        let mut ends = Vec::new();
        let mut previous_end = 0;
        for end in locate_chunk_ends(text, &chunker.chunk(text)) {
            ends.extend(fit_to_budget(text, previous_end, end, budget, &self.counter));
            previous_end = end;
        }

        let mut spans: Vec<TextSpan> = Vec::with_capacity(ends.len());
        let mut previous_end = 0;
        for end in ends {
            let fresh_start = previous_end;
            let start = match spans.last() {
                Some(previous) if self.overlap > 0 => {
                    self.overlap_start(text, previous.fresh_start, previous_end, end)
                }
                _ => fresh_start,
            };
            spans.push(TextSpan {
                start,
                fresh_start,
                end,
            });
            previous_end = end;
        }
        spans
    }

    /// Start of a span ending at `end` whose overlap is carried from `[previous_fresh,
    /// previous_end)`. The overlap shrinks until the whole span fits `chunk_size`.
    fn overlap_start(&self, text: &str, previous_fresh: usize, previous_end: usize, end: usize) -> usize {
        let previous = &text[previous_fresh..previous_end];
        let mut limit = self.overlap;
        loop {
            let tail = tail_with_token_limit(previous, limit, &self.counter);
            let start = previous_end - tail.len();
            let tokens = self.counter.as_ref()(&text[start..end]);
            if limit == 0 || tokens <= self.chunk_size {
                return start;
            }
            limit = limit.saturating_sub(tokens - self.chunk_size);
        }
    }
}

/// Cut `[start, end)` into consecutive pieces of at most `budget` tokens and return their
/// ends. Cuts land just before a word when one fits, otherwise on a character boundary.
/// Every piece holds at least one non-whitespace character of its own.
fn fit_to_budget(
    text: &str,
    start: usize,
    end: usize,
    budget: usize,
    counter: &TokenCounter,
) -> Vec<usize> {
    let count = |from: usize, to: usize| counter.as_ref()(&text[from..to]);
    let mut ends = Vec::new();
    let mut cursor = start;
    while cursor < end {
        if count(cursor, end) <= budget {
            ends.push(end);
            break;
        }
        let segment = &text[cursor..end];
        let first_word = cursor + (segment.len() - segment.trim_start().len());
        let fits = |to: usize| count(cursor, to) <= budget;

        let word_starts: Vec<usize> = text[first_word..end]
            .char_indices()
            .zip(text[first_word..end].chars().skip(1))
            .filter(|((_, current), next)| current.is_whitespace() && !next.is_whitespace())
            .map(|((offset, current), _)| first_word + offset + current.len_utf8())
            .collect();
        let cut = longest_fitting(&word_starts, fits).or_else(|| {
            let boundaries: Vec<usize> = text[first_word..end]
                .char_indices()
                .skip(1)
                .map(|(offset, _)| first_word + offset)
                .collect();
            longest_fitting(&boundaries, fits)
        });
        let cut = cut.unwrap_or_else(|| {
            text[first_word..end]
                .chars()
                .next()
                .map_or(end, |first| first_word + first.len_utf8())
        });
        if cut == end {
            ends.push(end);
            break;
        }
        ends.push(cut);
        cursor = cut;
    }
    ends
}

/// Largest candidate accepted by `fits`. Candidates are ascending and token counts grow
/// with length, so a binary search finds the edge; nearby candidates are rechecked because
/// BPE counts are not strictly monotonic.
fn longest_fitting(candidates: &[usize], fits: impl Fn(usize) -> bool) -> Option<usize> {
    let mut index = candidates.partition_point(|&candidate| fits(candidate));
    while index > 0 {
        let candidate = candidates[index - 1];
        if fits(candidate) {
            return Some(candidate);
        }
        index -= 1;
    }
    None
}

/// Map semantic chunks back onto byte offsets.
///
/// Every returned end is strictly increasing and the last one equals `text.len()`, so the
/// ranges `[previous_end, end)` tile the input. Chunks that cannot be located are folded into
/// the following range.
fn locate_chunk_ends(text: &str, chunks: &[String]) -> Vec<usize> {
    let mut ends = Vec::with_capacity(chunks.len());
    let mut cursor = 0;
    for chunk in chunks.iter().filter(|chunk| !chunk.is_empty()) {
        match text[cursor..].find(chunk.as_str()) {
            Some(offset) => {
                cursor += offset + chunk.len();
                ends.push(cursor);
            }
            None => {
                tracing::debug!(
                    cursor,
                    chunk_len = chunk.len(),
                    "Chunk not found verbatim; merging into next span"
                );
            }
        }
    }

    match ends.last_mut() {
        Some(last) => *last = text.len(),
        None => ends.push(text.len()),
    }
    ends
}

/// Determine the chunk size for a request, respecting overrides and safe defaults.
///
/// Precedence:
/// 1) Explicit override (e.g., `TEXT_SPLITTER_CHUNK_SIZE`) wins and is clamped at `>= 1`.
/// 2) Otherwise, derive from the provider/model context window and divide by `4` (or `8` when
///    `use_safe_defaults` is true). The result is clamped into `[128, 512]`.
pub(crate) fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
    use_safe_defaults: bool,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    let divisor = if use_safe_defaults { 8 } else { 4 };
    let base = (window / divisor).max(1);
    base.clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

/// Look up the embedding context window for a given provider/model combination.
pub(crate) fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama => ollama_embedding_context_window(model),
        EmbeddingProvider::Hashed => 1024,
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8192;
    }

    let size = get_context_size(model);
    if size == 4096 && model.contains("embedding") {
        tracing::debug!(model, "Using default embedding context window fallback");
    }
    size
}

fn ollama_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default Ollama context window estimate");
            4096
        }
    }
}

/// Build a token counter for the given provider/model.
///
/// The hashed embedder counts whitespace tokens. Ollama models fall back to whitespace
/// counting when no tiktoken encoding can be resolved.
pub(crate) fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::Hashed => Ok(whitespace_token_counter()),
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; falling back to whitespace counter"
                );
                Ok(whitespace_token_counter())
            }
        },
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// Count whitespace-separated words; non-empty text always counts as at least one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

/// Longest suffix of `text` (leading whitespace trimmed) that fits within `token_limit`.
fn tail_with_token_limit<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    if token_limit == 0 {
        return "";
    }

    let trimmed_text = text.trim_start();
    if token_counter.as_ref()(trimmed_text) <= token_limit {
        return trimmed_text;
    }

    let len = text.len();
    let mut start = 0;

    while start < len {
        let next_start = text[start..]
            .char_indices()
            .nth(1)
            .map(|(offset, _)| start + offset)
            .unwrap_or(len);
        start = next_start;
        let trimmed = text[start..].trim_start();
        if token_counter.as_ref()(trimmed) <= token_limit {
            return trimmed;
        }
    }

    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::new(chunk_size, overlap, whitespace_token_counter()).expect("splitter")
    }

    fn rebuild(text: &str, spans: &[TextSpan]) -> String {
        spans.iter().map(|span| span.fresh(text)).collect()
    }

    #[test]
    fn split_respects_chunk_size_whitespace_counter() {
        let text = "one two three four five";
        let spans = splitter(2, 0).split(text);
        let slices: Vec<&str> = spans.iter().map(|span| span.slice(text).trim()).collect();
        assert_eq!(slices, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn split_handles_blank_input() {
        assert!(splitter(4, 0).split("").is_empty());
        assert!(splitter(4, 0).split(" \n\t ").is_empty());
    }

    #[test]
    fn split_applies_token_overlap() {
        let text = "one two three four five";
        let counter = whitespace_token_counter();
        let spans = splitter(3, 1).split(text);
        let slices: Vec<&str> = spans.iter().map(|span| span.slice(text)).collect();
        assert_eq!(slices, vec!["one two", "two three four", "four five"]);
        for slice in &slices {
            assert!(counter.as_ref()(slice) <= 3);
        }
    }

    #[test]
    fn fresh_parts_rebuild_the_source_exactly() {
        let text = "Revenue grew in Q3.\n\nCosts were flat.  Margins improved!\n\
                    \n  Outlook: cautious but positive for the next two quarters.\n";
        for (size, overlap) in [(1, 0), (3, 1), (5, 2), (8, 0), (64, 8)] {
            let spans = splitter(size, overlap).split(text);
            assert_eq!(rebuild(text, &spans), text, "size={size} overlap={overlap}");
            for pair in spans.windows(2) {
                assert_eq!(pair[0].end, pair[1].fresh_start);
                assert!(pair[1].start <= pair[1].fresh_start);
                assert!(pair[1].start >= pair[0].fresh_start);
            }
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "alpha beta gamma. delta epsilon zeta. eta theta iota.";
        assert_eq!(splitter(4, 1).split(text), splitter(4, 1).split(text));
    }

    #[test]
    fn locate_folds_unknown_chunks_into_next_span() {
        let text = "aaa bbb ccc";
        let ends = locate_chunk_ends(text, &["aaa".into(), "zzz".into(), "ccc".into()]);
        assert_eq!(ends, vec![3, text.len()]);
    }

    #[test]
    fn new_rejects_zero_chunk_size() {
        let error = TextSplitter::new(0, 0, whitespace_token_counter()).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn tiktoken_budget_is_respected() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let counter = build_tiktoken_counter("text-embedding-3-small").expect("encoding");
        let splitter = TextSplitter::new(5, 0, counter.clone()).expect("splitter");
        let spans = splitter.split(text);
        for span in &spans {
            assert!(counter.as_ref()(span.slice(text).trim()) <= 5);
        }
        assert_eq!(rebuild(text, &spans), text);
    }

    /// Forty paragraphs of uneven length plus one long run-on paragraph.
    fn report_prose() -> String {
        const SENTENCES: [&str; 8] = [
            "Revenue grew in every region during the third quarter, led by strong enterprise renewals.",
            "Operating costs stayed flat because hiring slowed after the spring planning cycle.",
            "The board approved a modest buyback while keeping enough cash for two acquisitions.",
            "Customer churn fell to its lowest level since the product relaunch last year.",
            "Shipping delays in the northern warehouses pushed some hardware orders into October.",
            "Gross margin improved by nearly two points as cloud hosting contracts were renegotiated.",
            "Management expects demand to soften slightly, but the pipeline remains healthy overall.",
            "Research spending focused on search quality, document parsing, and faster indexing.",
        ];
        let mut paragraphs: Vec<String> = (0..40)
            .map(|paragraph| {
                (0..1 + paragraph % 7)
                    .map(|sentence| SENTENCES[(paragraph * 3 + sentence) % SENTENCES.len()])
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        paragraphs.insert(
            17,
            (0..300)
                .map(|word| format!("ledger{word}"))
                .collect::<Vec<_>>()
                .join(" "),
        );
        paragraphs.join("\n\n")
    }

    fn assert_within_budget(text: &str, splitter: &TextSplitter, counter: &TokenCounter) {
        let spans = splitter.split(text);
        assert!(spans.len() > 1);
        for span in &spans {
            let tokens = counter.as_ref()(span.slice(text));
            assert!(
                tokens <= splitter.chunk_size(),
                "span {span:?} has {tokens} tokens, limit {}",
                splitter.chunk_size()
            );
            assert!(!span.fresh(text).trim().is_empty());
        }
        assert_eq!(rebuild(text, &spans), text);
    }

    #[test]
    fn long_prose_stays_within_whitespace_budget() {
        let counter = whitespace_token_counter();
        let splitter = TextSplitter::new(64, 8, counter.clone()).expect("splitter");
        assert_within_budget(&report_prose(), &splitter, &counter);
    }

    #[test]
    fn long_prose_stays_within_tiktoken_budget() {
        let counter = build_tiktoken_counter("text-embedding-3-small").expect("encoding");
        let splitter = TextSplitter::new(256, 32, counter.clone()).expect("splitter");
        assert_within_budget(&report_prose(), &splitter, &counter);
    }

    #[test]
    fn unbroken_runs_are_cut_on_character_boundaries() {
        let counter = build_tiktoken_counter("text-embedding-3-small").expect("encoding");
        let splitter = TextSplitter::new(16, 4, counter.clone()).expect("splitter");
        let text = "Ünïcödé-without-spaces-".repeat(40);
        assert_within_budget(&text, &splitter, &counter);
    }

    #[test]
    fn fit_to_budget_prefers_word_starts() {
        let text = "alpha beta gamma delta";
        let ends = fit_to_budget(text, 0, text.len(), 2, &whitespace_token_counter());
        assert_eq!(ends, vec![11, text.len()]);
        assert_eq!(&text[..11], "alpha beta ");
    }

    #[test]
    fn determine_chunk_size_prefers_override() {
        let chunk_size = determine_chunk_size(
            Some(42),
            EmbeddingProvider::OpenAI,
            "text-embedding-3-small",
            false,
        );
        assert_eq!(chunk_size, 42);
    }

    #[test]
    fn determine_chunk_size_clamps_model_windows() {
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::OpenAI, "text-embedding-3-small", false),
            512
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Ollama, "all-minilm-l6-v2", false),
            128
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Hashed, "feature-hash-v1", false),
            256
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Hashed, "feature-hash-v1", true),
            128
        );
    }
}
