use super::jobs::{IngestionJob, JobRegistry};
use super::types::{JobReport, OverallReadiness, PipelineError, QueryRequest, SkippedFragment, Upload};
use crate::answer::{AnswerComposer, AnswerGenerator, build_generator};
use crate::config::{Config, OcrEngineKind};
use crate::embedding::{EmbeddingAdapter, EmbeddingClient, RetryPolicy, build_embedding_client};
use crate::extraction::chunking::TextSplitter;
use crate::extraction::ocr::{DisabledOcr, OcrEngine, TesseractOcr};
use crate::extraction::pdf::{LopdfReader, PdfReader};
use crate::extraction::FragmentExtractor;
use crate::index::{AssetStore, SearchFilter, VectorIndex, snapshot};
use crate::metrics::{MetricsSnapshot, RagMetrics};
use crate::model::{
    Answer, Document, DocumentId, DocumentKind, Fragment, FragmentContent, FragmentId, Partition,
    ValidationError,
};
use crate::router::QueryRouter;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Interface implemented by the retrieval engine and consumed by the HTTP shell.
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Register a document and start ingesting it in the background.
    async fn submit(&self, upload: Upload) -> Result<DocumentId, ValidationError>;

    /// Progress of one ingestion job, or `None` for unknown ids.
    fn readiness(&self, document_id: DocumentId) -> Option<JobReport>;

    /// Readiness across all jobs.
    fn overall_readiness(&self) -> OverallReadiness;

    /// Answer a question from the indexed fragments.
    async fn ask(&self, request: QueryRequest) -> Result<Answer, ValidationError>;

    /// PNG bytes of an `image` fragment.
    fn asset(&self, fragment_id: FragmentId) -> Result<Option<Vec<u8>>, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Multimodal ingestion and retrieval engine.
#[derive(Clone)]
pub struct RagService {
    inner: Arc<Inner>,
}

struct Inner {
    extractor: FragmentExtractor,
    embedder: EmbeddingAdapter,
    index: VectorIndex,
    assets: AssetStore,
    router: QueryRouter,
    composer: AnswerComposer,
    jobs: JobRegistry,
    metrics: RagMetrics,
    snapshot_dir: Option<PathBuf>,
    snapshot_lock: tokio::sync::Mutex<()>,
}

/// Assembles a [`RagService`], letting callers replace any backend.
pub struct RagServiceBuilder {
    config: Config,
    ocr: Option<Arc<dyn OcrEngine>>,
    pdf_reader: Option<Arc<dyn PdfReader>>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    generator: Option<Option<Arc<dyn AnswerGenerator>>>,
    snapshot_dir: Option<PathBuf>,
}

impl RagServiceBuilder {
    /// Use a specific OCR engine instead of `OCR_ENGINE`.
    pub fn ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Use a specific PDF reader.
    pub fn pdf_reader(mut self, reader: Arc<dyn PdfReader>) -> Self {
        self.pdf_reader = Some(reader);
        self
    }

    /// Use a specific embedding client instead of `EMBEDDING_PROVIDER`.
    pub fn embedding_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.embedding_client = Some(client);
        self
    }

    /// Use a specific answer generator, or `None` for extractive answers only.
    pub fn generator(mut self, generator: Option<Arc<dyn AnswerGenerator>>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Persist the index under `dir` and restore it on build.
    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Build the service, restoring the snapshot when one exists.
    pub fn build(self) -> Result<RagService, PipelineError> {
        let config = self.config;
        let splitter = TextSplitter::for_model(
            config.text_splitter_chunk_size,
            config.text_splitter_chunk_overlap,
            config.embedding_provider,
            &config.embedding_model,
            config.text_splitter_use_safe_defaults,
        )?;
        let ocr: Arc<dyn OcrEngine> = match (self.ocr, config.ocr_engine) {
            (Some(ocr), _) => ocr,
            (None, OcrEngineKind::Tesseract) => {
                Arc::new(TesseractOcr::new(config.tesseract_path.clone()))
            }
            (None, OcrEngineKind::None) => Arc::new(DisabledOcr),
        };
        let pdf_reader: Arc<dyn PdfReader> = match self.pdf_reader {
            Some(reader) => reader,
            None => Arc::new(LopdfReader),
        };
        let embedding_client = match self.embedding_client {
            Some(client) => client,
            None => build_embedding_client(&config)?,
        };
        let generator = match self.generator {
            Some(generator) => generator,
            None => build_generator(&config)?,
        };

        let snapshot_dir = self.snapshot_dir.or_else(|| config.index_snapshot_dir.clone());
        let assets = AssetStore::new();
        let index = match snapshot_dir.as_deref() {
            Some(dir) => restore(dir, &assets)?,
            None => VectorIndex::new(),
        };

        tracing::info!(
            splitter_chunk_size = splitter.chunk_size(),
            generator = generator.is_some(),
            snapshot_dir = ?snapshot_dir,
            text_records = index.len(Partition::Text),
            image_records = index.len(Partition::Image),
            "Retrieval engine initialized"
        );

        Ok(RagService {
            inner: Arc::new(Inner {
                extractor: FragmentExtractor::new(splitter, ocr, pdf_reader),
                embedder: EmbeddingAdapter::new(embedding_client, RetryPolicy::from_config(&config)),
                index,
                assets,
                router: QueryRouter::from_config(&config),
                composer: AnswerComposer::new(generator, config.max_context_fragments),
                jobs: JobRegistry::new(),
                metrics: RagMetrics::new(),
                snapshot_dir,
                snapshot_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

fn restore(dir: &Path, assets: &AssetStore) -> Result<VectorIndex, PipelineError> {
    match snapshot::load(dir)? {
        Some((snapshot, images)) => {
            let index = VectorIndex::from_snapshot(snapshot)?;
            for (fragment_id, png) in images {
                assets.insert(fragment_id, png)?;
            }
            tracing::info!(dir = %dir.display(), "Restored index snapshot");
            Ok(index)
        }
        None => Ok(VectorIndex::new()),
    }
}

impl RagService {
    /// Start configuring a service from `config`.
    pub fn builder(config: Config) -> RagServiceBuilder {
        RagServiceBuilder {
            config,
            ocr: None,
            pdf_reader: None,
            embedding_client: None,
            generator: None,
            snapshot_dir: None,
        }
    }

    /// Build a service with every backend chosen by `config`.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Self::builder(config.clone()).build()
    }

    /// Submit `upload` and wait until its ingestion job is ready.
    pub async fn ingest(&self, upload: Upload) -> Result<JobReport, PipelineError> {
        let document_id = self.submit_document(upload)?;
        self.wait_until_ready(document_id)
            .await
            .ok_or_else(|| PipelineError::Task(format!("job {document_id} disappeared")))
    }

    /// Wait for `document_id` to become ready and return its final report.
    pub async fn wait_until_ready(&self, document_id: DocumentId) -> Option<JobReport> {
        let job = self.inner.jobs.get(&document_id)?;
        job.wait_ready().await;
        Some(job.report())
    }

    /// Number of records in `partition`.
    pub fn indexed_records(&self, partition: Partition) -> usize {
        self.inner.index.len(partition)
    }

    /// Write the index and image assets to the snapshot directory, if one is configured.
    pub async fn save_snapshot(&self) -> Result<(), PipelineError> {
        let Some(dir) = self.inner.snapshot_dir.clone() else {
            return Ok(());
        };
        let _guard = self.inner.snapshot_lock.lock().await;
        let snapshot = self.inner.index.snapshot()?;
        let assets = self.inner.assets.entries()?;
        tokio::task::spawn_blocking(move || snapshot::save(&dir, &snapshot, &assets))
            .await
            .map_err(|error| PipelineError::Task(error.to_string()))??;
        Ok(())
    }

    fn submit_document(&self, upload: Upload) -> Result<DocumentId, ValidationError> {
        let Upload {
            bytes,
            filename,
            modality,
        } = upload;
        if bytes.is_empty() {
            return Err(ValidationError::EmptyDocument(filename));
        }
        let kind = DocumentKind::detect(modality.as_deref(), &filename, &bytes)?;
        let document = Document::new(kind, filename);
        let document_id = document.id;
        tracing::info!(
            %document_id,
            filename = %document.filename,
            kind = ?kind,
            bytes = bytes.len(),
            "Document accepted"
        );

        let job = self.inner.jobs.register(IngestionJob::new(document));
        let service = self.clone();
        tokio::spawn(async move {
            let worker = {
                let service = service.clone();
                let job = Arc::clone(&job);
                tokio::spawn(async move { service.run_ingestion(&job, bytes).await })
            };
            if let Err(error) = worker.await {
                tracing::error!(%document_id, error = %error, "Ingestion task failed");
                job.record_skipped(SkippedFragment::internal(error.to_string()));
            }
            service.finish_job(&job).await;
        });

        Ok(document_id)
    }

    async fn run_ingestion(&self, job: &IngestionJob, bytes: Vec<u8>) {
        let document = job.document();
        let mut fragments = std::pin::pin!(self.inner.extractor.extract(document, bytes));
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => self.index_fragment(job, document, fragment).await,
                Err(error) => {
                    tracing::warn!(
                        document_id = %document.id,
                        page = ?error.page,
                        stage = %error.stage,
                        error = %error.message,
                        "Extraction failed for one unit; continuing"
                    );
                    job.record_skipped(SkippedFragment::extraction(&error));
                }
            }
        }
    }

    async fn index_fragment(&self, job: &IngestionJob, document: &Document, fragment: Fragment) {
        let record = match self.inner.embedder.embed_fragment(document, &fragment).await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    fragment_id = %fragment.id,
                    modality = %fragment.modality,
                    retryable = error.is_retryable(),
                    error = %error,
                    "Embedding failed; skipping fragment"
                );
                job.record_skipped(SkippedFragment::embedding(fragment.page, &error));
                return;
            }
        };

        match self.inner.index.insert(record) {
            Ok(offset) => {
                tracing::trace!(fragment_id = %fragment.id, offset, "Fragment indexed");
                job.record_indexed();
            }
            Err(error) => {
                tracing::warn!(fragment_id = %fragment.id, error = %error, "Index rejected fragment");
                job.record_skipped(SkippedFragment::index(fragment.page, &error));
                return;
            }
        }

        // Assets are kept only for fragments the index accepted.
        if let FragmentContent::Image { png, .. } = fragment.content {
            if let Err(error) = self.inner.assets.insert(fragment.id, png) {
                tracing::warn!(fragment_id = %fragment.id, error = %error, "Image asset not stored");
            }
        }
    }

    async fn finish_job(&self, job: &IngestionJob) {
        if let Err(error) = self.save_snapshot().await {
            tracing::error!(error = %error, "Failed to write index snapshot");
        }

        let report = job.report();
        self.inner
            .metrics
            .record_document(report.indexed as u64, report.skipped.len() as u64);
        if job.mark_ready() {
            tracing::info!(
                document_id = %report.document_id,
                indexed = report.indexed,
                skipped = report.skipped.len(),
                "Ingestion complete"
            );
        }
    }

    /// Partitions to search: the routed ones, unless all of them are empty while another
    /// partition has records.
    fn effective_partitions(&self, routed: &[Partition]) -> Vec<Partition> {
        let index = &self.inner.index;
        if routed.iter().any(|partition| index.len(*partition) > 0) {
            return routed.to_vec();
        }
        let fallback: Vec<Partition> = Partition::ALL
            .into_iter()
            .filter(|partition| !routed.contains(partition) && index.len(*partition) > 0)
            .collect();
        if fallback.is_empty() {
            routed.to_vec()
        } else {
            tracing::debug!(?routed, ?fallback, "Routed partitions empty; falling back");
            fallback
        }
    }

    fn search_filter(&self, request: &QueryRequest) -> SearchFilter {
        match (request.document_id, request.latest_only) {
            (Some(document_id), _) => SearchFilter::document(document_id),
            (None, true) => self
                .inner
                .jobs
                .latest()
                .map(SearchFilter::document)
                .unwrap_or_default(),
            (None, false) => SearchFilter::default(),
        }
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn submit(&self, upload: Upload) -> Result<DocumentId, ValidationError> {
        self.submit_document(upload)
    }

    fn readiness(&self, document_id: DocumentId) -> Option<JobReport> {
        self.inner.jobs.get(&document_id).map(|job| job.report())
    }

    fn overall_readiness(&self) -> OverallReadiness {
        self.inner.jobs.overall()
    }

    async fn ask(&self, request: QueryRequest) -> Result<Answer, ValidationError> {
        let plan = self.inner.router.route(&request.question, request.top_k)?;
        let filter = self.search_filter(&request);
        let question = request.question.trim();

        let query = match self.inner.embedder.embed_query(question).await {
            Ok(vector) => Some(vector),
            Err(error) => {
                tracing::warn!(error = %error, "Query embedding failed");
                None
            }
        };

        let mut ranked = Vec::new();
        for partition in self.effective_partitions(&plan.partitions) {
            let Some(query) = query.as_deref() else {
                ranked.push(Vec::new());
                continue;
            };
            match self.inner.index.search(partition, query, plan.top_k, &filter) {
                Ok(hits) => ranked.push(hits),
                Err(error) => {
                    tracing::warn!(%partition, error = %error, "Search failed");
                    ranked.push(Vec::new());
                }
            }
        }

        let answer = self.inner.composer.compose(question, plan.intent, ranked).await;
        self.inner.metrics.record_query(answer.is_no_relevant_content());
        tracing::info!(
            intent = ?answer.intent,
            citations = answer.citations.len(),
            outcome = ?answer.outcome,
            "Question answered"
        );
        Ok(answer)
    }

    fn asset(&self, fragment_id: FragmentId) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self.inner.assets.get(&fragment_id)?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}
