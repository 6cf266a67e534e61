use super::{InferenceBackend, InferenceRequest};
use crate::config::InferenceConfig;
use crate::error::AnalysisError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Sampling settings applied to every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl GenerationSettings {
    /// Deterministic preference: temperature 0, JSON output, bounded length.
    pub fn deterministic(max_output_tokens: u32) -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            max_output_tokens,
        }
    }
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    settings: GenerationSettings,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, AnalysisError> {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.api_base.trim_end_matches('/'),
            config.model
        );
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| AnalysisError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            settings: GenerationSettings::deterministic(config.max_output_tokens),
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
    }

    /// Request body with parts in instruction, schema, image order.
    pub fn request_body(&self, request: &InferenceRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.instruction },
                    { "text": request.schema_text },
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_type,
                            "data": STANDARD.encode(&request.image.data),
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "topP": self.settings.top_p,
                "maxOutputTokens": self.settings.max_output_tokens,
                "responseMimeType": "application/json",
            }
        })
    }

    fn send_error(&self, source: reqwest::Error) -> AnalysisError {
        if source.is_timeout() {
            AnalysisError::Timeout {
                after: self.timeout,
            }
        } else {
            AnalysisError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for GeminiClient {
    #[instrument(name = "gemini_generate_content", skip_all, fields(endpoint = %self.endpoint))]
    async fn infer(&self, request: &InferenceRequest) -> Result<String, AnalysisError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(error = %e, %status, "failed to read upstream error body");
                    String::new()
                }
            };
            return Err(AnalysisError::UpstreamError {
                status: Some(status.as_u16()),
                message: upstream_message(&body, status.canonical_reason()),
            });
        }

        let body = response.bytes().await.map_err(|e| self.send_error(e))?;
        let envelope: GenerateContentResponse =
            serde_json::from_slice(&body).map_err(|e| AnalysisError::UpstreamError {
                status: Some(status.as_u16()),
                message: format!("unreadable response envelope: {e}"),
            })?;
        let text = envelope.into_text()?;
        debug!(chars = text.len(), "received model output");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, all text parts concatenated.
    fn into_text(self) -> Result<String, AnalysisError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            let message = match block_reason {
                Some(reason) => format!("prompt blocked: {reason}"),
                None => "response contained no candidates".to_string(),
            };
            return Err(AnalysisError::UpstreamError {
                status: None,
                message,
            });
        };
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AnalysisError::UpstreamError {
                status: None,
                message: format!(
                    "candidate contained no text (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }
        Ok(text)
    }
}

/// Best human-readable message from an error body.
fn upstream_message(body: &str, reason: Option<&str>) -> String {
    let from_envelope = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_owned)
    });
    if let Some(message) = from_envelope {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return reason.unwrap_or("empty response body").to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
