//! Optical character recognition backends.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors raised by OCR backends.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR program could not be started.
    #[error("failed to launch OCR engine '{program}': {source}")]
    Launch {
        /// Program we attempted to run.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// The OCR program ran but reported a failure.
    #[error("OCR engine exited with {status}: {stderr}")]
    Failed {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Communication with the OCR program failed mid-flight.
    #[error("OCR I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognises text inside an encoded image (PNG or JPEG).
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Return the recognised text; an empty string means no text was found.
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// OCR backend that never finds text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Runs `tesseract stdin stdout` and feeds the image through standard input.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    program: String,
}

impl TesseractOcr {
    /// Create a backend invoking the given executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.program)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OcrError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = normalize_ocr_text(&String::from_utf8_lossy(&output.stdout));
        tracing::trace!(chars = text.len(), "OCR finished");
        Ok(text)
    }
}

/// Drop blank lines and trailing whitespace that tesseract emits around recognised text.
pub(crate) fn normalize_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
