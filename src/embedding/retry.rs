use super::{EmbeddingClientError, EmbeddingError};
use crate::config::Config;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; it is raised to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy described by `EMBEDDING_MAX_ATTEMPTS` and `EMBEDDING_RETRY_BASE_MS`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.embedding_max_attempts,
            Duration::from_millis(config.embedding_retry_base_ms),
        )
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1_u32 << retry.min(16))
    }

    /// Run `operation`, retrying transient failures until attempts run out.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingClientError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(EmbeddingError::Rejected(error)),
                Err(error) if attempt >= self.max_attempts => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Embedding call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}
