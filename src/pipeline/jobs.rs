//! Per-document ingestion state.

use super::types::{JobReport, OverallReadiness, SkippedFragment};
use crate::model::{Document, DocumentId, current_timestamp_rfc3339};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct Progress {
    indexed: usize,
    skipped: Vec<SkippedFragment>,
    completed_at: Option<String>,
}

/// State of one document's ingestion. Readiness flips from `false` to `true` once.
#[derive(Debug)]
pub struct IngestionJob {
    document: Document,
    ready: watch::Sender<bool>,
    progress: Mutex<Progress>,
}

impl IngestionJob {
    /// New job for `document`, not yet ready.
    pub fn new(document: Document) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            document,
            ready,
            progress: Mutex::new(Progress::default()),
        }
    }

    /// Document being ingested.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Whether every fragment has been attempted.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Resolve once the job is ready.
    pub async fn wait_ready(&self) {
        let mut receiver = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|ready| *ready).await;
    }

    pub(crate) fn record_indexed(&self) {
        self.with_progress(|progress| progress.indexed += 1);
    }

    pub(crate) fn record_skipped(&self, skipped: SkippedFragment) {
        self.with_progress(|progress| progress.skipped.push(skipped));
    }

    /// Flip readiness. Returns `false` if the job was already ready.
    pub(crate) fn mark_ready(&self) -> bool {
        self.with_progress(|progress| {
            progress
                .completed_at
                .get_or_insert_with(current_timestamp_rfc3339);
        });
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Current progress.
    pub fn report(&self) -> JobReport {
        let (indexed, skipped, completed_at) = match self.progress.lock() {
            Ok(progress) => (
                progress.indexed,
                progress.skipped.clone(),
                progress.completed_at.clone(),
            ),
            Err(poisoned) => {
                let progress = poisoned.into_inner();
                (
                    progress.indexed,
                    progress.skipped.clone(),
                    progress.completed_at.clone(),
                )
            }
        };
        JobReport {
            document_id: self.document.id,
            filename: self.document.filename.clone(),
            kind: self.document.kind,
            ready: self.is_ready(),
            indexed,
            skipped,
            submitted_at: self.document.uploaded_at.clone(),
            completed_at,
        }
    }

    fn with_progress(&self, update: impl FnOnce(&mut Progress)) {
        match self.progress.lock() {
            Ok(mut progress) => update(&mut progress),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    jobs: HashMap<DocumentId, Arc<IngestionJob>>,
    order: Vec<DocumentId>,
}

/// All jobs submitted since startup, in submission order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    inner: RwLock<Registry>,
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `job` and return a shared handle to it.
    pub fn register(&self, job: IngestionJob) -> Arc<IngestionJob> {
        let job = Arc::new(job);
        let id = job.document().id;
        let mut registry = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.jobs.insert(id, Arc::clone(&job));
        registry.order.push(id);
        job
    }

    /// Job for `document_id`, if known.
    pub fn get(&self, document_id: &DocumentId) -> Option<Arc<IngestionJob>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .jobs
            .get(document_id)
            .cloned()
    }

    /// Most recently submitted document.
    pub fn latest(&self) -> Option<DocumentId> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .order
            .last()
            .copied()
    }

    /// Readiness derived from every job.
    pub fn overall(&self) -> OverallReadiness {
        let registry = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pending = registry.jobs.values().filter(|job| !job.is_ready()).count();
        OverallReadiness {
            ready: pending == 0,
            total_jobs: registry.jobs.len(),
            pending_jobs: pending,
        }
    }
}
