use super::{InferenceBackend, InferenceRequest};
use crate::error::AnalysisError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

type Reply = Box<dyn Fn() -> Result<String, AnalysisError> + Send + Sync>;

/// Backend that answers every request from a fixed script and records what it saw.
pub struct ScriptedBackend {
    reply: Reply,
    delay: Option<Duration>,
    calls: AtomicU64,
    last_request: Mutex<Option<InferenceRequest>>,
}

impl ScriptedBackend {
    /// Always answers with `text` as the model output.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_reply(Box::new(move || Ok(text.clone())))
    }

    /// Always fails with the error `make_error` builds.
    pub fn failing<F>(make_error: F) -> Self
    where
        F: Fn() -> AnalysisError + Send + Sync + 'static,
    {
        Self::with_reply(Box::new(move || Err(make_error())))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            delay: None,
            calls: AtomicU64::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Waits this long before answering, like a slow upstream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<InferenceRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.reply)()
    }
}
