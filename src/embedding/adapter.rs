use super::{EmbeddingClient, EmbeddingError, RetryPolicy};
use crate::model::{Document, EmbeddingRecord, Fragment};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Longest excerpt stored alongside a vector, in characters.
pub const MAX_EXCERPT_CHARS: usize = 600;

/// Embeds fragments and questions, and wraps fragment vectors in an [`EmbeddingRecord`].
///
/// Images are embedded through their caption, so one text embedder serves both partitions.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    client: Arc<dyn EmbeddingClient>,
    retry: RetryPolicy,
}

impl EmbeddingAdapter {
    /// Wrap `client` with the retry policy applied to every call.
    pub fn new(client: Arc<dyn EmbeddingClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Embed one fragment of `document`.
    pub async fn embed_fragment(
        &self,
        document: &Document,
        fragment: &Fragment,
    ) -> Result<EmbeddingRecord, EmbeddingError> {
        let text = fragment.content.embedding_text();
        let vector = self.embed(text).await?;

        Ok(EmbeddingRecord {
            fragment_id: fragment.id,
            document_id: fragment.document_id,
            document_name: document.filename.clone(),
            modality: fragment.modality,
            excerpt: excerpt(text),
            vector,
            page: fragment.page,
            sequence: fragment.sequence,
            content_hash: hex::encode(Sha256::digest(text.as_bytes())),
        })
    }

    /// Embed a question for search.
    pub async fn embed_query(&self, question: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(question).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self
            .retry
            .run(|| self.client.generate_embeddings(vec![text.to_string()]))
            .await?;
        vectors.into_iter().next().ok_or(EmbeddingError::EmptyResponse)
    }
}

/// Trimmed text capped at [`MAX_EXCERPT_CHARS`] characters.
pub(crate) fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClientError, HashedEmbeddingClient};
    use crate::model::{DocumentKind, FragmentContent, FragmentModality};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(EmbeddingClientError::Transient("503".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn document() -> Document {
        Document::new(DocumentKind::Image, "chart.png")
    }

    #[tokio::test]
    async fn image_fragments_embed_their_caption() {
        let doc = document();
        let fragment = Fragment::new(
            doc.id,
            FragmentModality::Image,
            FragmentContent::Image {
                png: vec![1, 2, 3],
                caption: "  Revenue by quarter  ".into(),
            },
            Some(2),
            4,
            None,
        );
        let adapter = EmbeddingAdapter::new(
            Arc::new(HashedEmbeddingClient::new(32)),
            RetryPolicy::default(),
        );
        let record = adapter.embed_fragment(&doc, &fragment).await.expect("record");

        assert_eq!(record.fragment_id, fragment.id);
        assert_eq!(record.document_name, "chart.png");
        assert_eq!(record.excerpt, "Revenue by quarter");
        assert_eq!(record.page, Some(2));
        assert_eq!(record.sequence, 4);
        assert_eq!(record.vector.len(), 32);
        assert_eq!(record.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed_by_retry() {
        let doc = document();
        let fragment = Fragment::new(
            doc.id,
            FragmentModality::Text,
            FragmentContent::Text("hello".into()),
            None,
            0,
            None,
        );
        let client = Arc::new(FlakyClient {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let adapter = EmbeddingAdapter::new(client.clone(), RetryPolicy::new(2, Duration::from_millis(1)));
        let record = adapter.embed_fragment(&doc, &fragment).await.expect("record");
        assert_eq!(record.vector, vec![1.0, 0.0]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_and_caption_share_one_vector_space() {
        let adapter = EmbeddingAdapter::new(
            Arc::new(HashedEmbeddingClient::new(16)),
            RetryPolicy::default(),
        );
        let doc = document();
        let fragment = Fragment::new(
            doc.id,
            FragmentModality::Image,
            FragmentContent::Image {
                png: vec![0],
                caption: "chart".into(),
            },
            None,
            0,
            None,
        );
        let query = adapter.embed_query("chart").await.expect("query");
        let record = adapter.embed_fragment(&doc, &fragment).await.expect("record");
        assert_eq!(query, record.vector);
    }

    #[test]
    fn excerpt_is_trimmed_and_capped_on_char_boundaries() {
        let long = "é".repeat(MAX_EXCERPT_CHARS + 10);
        assert_eq!(excerpt(&long).chars().count(), MAX_EXCERPT_CHARS);
        assert_eq!(excerpt("  short \n"), "short");
    }
}
