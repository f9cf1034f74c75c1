//! Embedding providers and the adapter that turns fragments into index records.

mod adapter;
mod hashed;
mod ollama;
mod openai;
mod retry;

pub use adapter::EmbeddingAdapter;
pub use hashed::HashedEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;
pub use retry::RetryPolicy;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Temporary failure (rate limit, server error, network); worth retrying.
    #[error("Embedding provider temporarily unavailable: {0}")]
    Transient(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub(crate) fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{provider} returned {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient(message)
        } else {
            Self::GenerationFailed(message)
        }
    }

    /// Classify a transport error; anything that never reached the provider is transient.
    pub(crate) fn from_transport(provider: &str, error: reqwest::Error) -> Self {
        let message = format!("failed to reach {provider}: {error}");
        if error.is_connect() || error.is_timeout() || error.is_request() {
            Self::Transient(message)
        } else {
            Self::GenerationFailed(message)
        }
    }
}

/// Errors surfaced by the [`EmbeddingAdapter`] after retries are applied.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Every attempt failed with a retryable error.
    #[error("embedding failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error returned by the provider.
        #[source]
        source: EmbeddingClientError,
    },
    /// The provider rejected the input permanently.
    #[error("embedding rejected: {0}")]
    Rejected(#[source] EmbeddingClientError),
    /// The provider returned no vector for the input.
    #[error("embedding provider returned no vector")]
    EmptyResponse,
}

impl EmbeddingError {
    /// Whether the failure was transient in nature (and retries ran out).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build an embedding client suitable for the supplied configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    match config.embedding_provider {
        EmbeddingProvider::Hashed => Ok(Arc::new(HashedEmbeddingClient::new(
            config.embedding_dimension,
        ))),
        EmbeddingProvider::Ollama => {
            let base_url = config
                .embedding_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Arc::new(OllamaEmbeddingClient::new(
                http_client()?,
                base_url,
                config.embedding_model.clone(),
            )))
        }
        EmbeddingProvider::OpenAI => {
            let base_url = config
                .embedding_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::GenerationFailed("OPENAI_API_KEY is not set".into())
            })?;
            Ok(Arc::new(OpenAiEmbeddingClient::new(
                http_client()?,
                base_url,
                api_key,
                config.embedding_model.clone(),
                config.embedding_dimension,
            )))
        }
    }
}

fn http_client() -> Result<Client, EmbeddingClientError> {
    Client::builder()
        .user_agent("multirag/embedding")
        .build()
        .map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("failed to build HTTP client: {error}"))
        })
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
