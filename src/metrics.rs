use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Debug, Default)]
pub struct RagMetrics {
    documents_ingested: AtomicU64,
    fragments_indexed: AtomicU64,
    fragments_skipped: AtomicU64,
    queries_answered: AtomicU64,
    no_content_answers: AtomicU64,
}

impl RagMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished ingestion job and its fragment counts.
    pub fn record_document(&self, indexed: u64, skipped: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.fragments_indexed.fetch_add(indexed, Ordering::Relaxed);
        self.fragments_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_query(&self, no_content: bool) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
        if no_content {
            self.no_content_answers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            fragments_indexed: self.fragments_indexed.load(Ordering::Relaxed),
            fragments_skipped: self.fragments_skipped.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            no_content_answers: self.no_content_answers.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents whose ingestion job completed since startup.
    pub documents_ingested: u64,
    /// Fragments embedded and inserted into the index.
    pub fragments_indexed: u64,
    /// Fragments dropped because extraction, embedding, or insertion failed.
    pub fragments_skipped: u64,
    /// Questions answered.
    pub queries_answered: u64,
    /// Answers that reported no relevant content.
    pub no_content_answers: u64,
}
