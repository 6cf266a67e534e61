//! The single remote interaction of the system.
//!
//! `InferenceBackend` is the seam between the pipeline and whatever answers
//! the prompt. `GeminiClient` talks to the real endpoint; `ScriptedBackend`
//! answers from a script so the pipeline and the HTTP service can be exercised
//! without a network.

mod gemini;
mod scripted;

pub use gemini::{GeminiClient, GenerationSettings};
pub use scripted::ScriptedBackend;

use crate::error::AnalysisError;
use async_trait::async_trait;
use image::ImageFormat;
use std::path::Path;

/// Encoded image bytes plus the MIME type the remote side should decode them as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub async fn load(path: &Path, format: ImageFormat) -> Result<Self, AnalysisError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AnalysisError::io(format!("failed to read {}", path.display()), e))?;
        Ok(Self {
            mime_type: format.to_mime_type(),
            data,
        })
    }
}

/// Everything one model call carries, in the order it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub instruction: String,
    pub schema_text: String,
    pub image: ImagePayload,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Sends one request and returns the model's raw text output.
    ///
    /// Implementations make exactly one attempt; retrying is not their job.
    async fn infer(&self, request: &InferenceRequest) -> Result<String, AnalysisError>;
}
