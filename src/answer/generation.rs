//! Clients that turn a grounded prompt into prose.
//!
//! Generation is optional; when no provider is configured, or a call fails, the composer
//! falls back to an extractive answer built from the retrieved excerpts.

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const TEMPERATURE: f32 = 0.2;

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider was misconfigured or unreachable.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Prompt handed to a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Instructions constraining the model to the supplied context.
    pub system: String,
    /// Question plus the retrieved context block.
    pub prompt: String,
}

/// Interface implemented by answer generation providers.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce the answer text for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// Build the generator selected by `GENERATION_PROVIDER`, if any.
pub fn build_generator(
    config: &Config,
) -> Result<Option<Arc<dyn AnswerGenerator>>, GenerationError> {
    match config.generation_provider {
        GenerationProvider::None => Ok(None),
        GenerationProvider::Ollama => {
            let base_url = config
                .generation_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Some(Arc::new(OllamaGenerator::new(
                http_client()?,
                base_url,
                config.generation_model.clone(),
            ))))
        }
        GenerationProvider::OpenAI => {
            let base_url = config
                .generation_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                GenerationError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Ok(Some(Arc::new(OpenAiGenerator::new(
                http_client()?,
                base_url,
                api_key,
                config.generation_model.clone(),
            ))))
        }
    }
}

fn http_client() -> Result<Client, GenerationError> {
    Client::builder()
        .user_agent("multirag/answer")
        .build()
        .map_err(|error| {
            GenerationError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
        })
}

/// Generator backed by Ollama's `/api/generate`.
pub struct OllamaGenerator {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    /// Build a generator for `model` served at `base_url`.
    pub fn new(http: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": TEMPERATURE,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// Generator backed by OpenAI's `/v1/chat/completions`.
pub struct OpenAiGenerator {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    /// Build a generator for `model`.
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!("failed to reach OpenAI: {error}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse("no completion returned".into()))
    }
}
