// THEORY:
// The `pipeline` module is the top-level API of the library. It wires the
// individual stages into the one sequence every analysis request follows:
//
//   RECEIVED -> VALIDATED -> NORMALIZED -> PROMPTED -> INFERRED -> COERCED -> EMITTED
//
// with an exit to FAILED from any state. Callers hand it a path and receive
// either a valid `AgingReport` or an `AnalysisError` naming the failing stage.
//
// Key architectural principles:
// 1.  **Fail fast, degrade late**: format problems and transport failures are
//     errors returned to the caller. Once the model has answered with text,
//     nothing can fail any more; bad text becomes the fallback report.
// 2.  **Owned cleanup**: intermediate files are held by `TransientFile`
//     guards, so every exit path, including an error halfway through,
//     releases them. The caller's own file is never touched here.
// 3.  **Explicit collaborators**: the prompt is built once at construction and
//     the inference backend is injected, so nothing in here reads the
//     environment.

use crate::coercer;
use crate::config::Config;
use crate::error::{AnalysisError, SchemaViolation};
use crate::inference::{GeminiClient, ImagePayload, InferenceBackend, InferenceRequest};
use crate::normalizer::{self, DEFAULT_MAX_DIMENSION, Normalizer};
use crate::prompt::{Prompt, PromptTemplate, ReportSchema};
use crate::report::AgingReport;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

/// States of a single analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Normalized,
    Prompted,
    Inferred,
    Coerced,
    Emitted,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Normalized => "normalized",
            Stage::Prompted => "prompted",
            Stage::Inferred => "inferred",
            Stage::Coerced => "coerced",
            Stage::Emitted => "emitted",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for the ReportPipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_dimension: u32,
    /// Where resized copies are written while a request is in flight.
    pub scratch_dir: PathBuf,
    pub schema: ReportSchema,
}

impl PipelineConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            scratch_dir: scratch_dir.into(),
            schema: ReportSchema::default(),
        }
    }
}

/// The result of one successful analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub report: AgingReport,
    /// Set when the model output was rejected and `report` is the fallback.
    pub violation: Option<SchemaViolation>,
    /// Dimensions of the image actually sent to the model.
    pub sent_dimensions: (u32, u32),
}

impl Analysis {
    pub fn is_fallback(&self) -> bool {
        self.violation.is_some()
    }
}

pub struct ReportPipeline {
    normalizer: Normalizer,
    prompt: Prompt,
    backend: Arc<dyn InferenceBackend>,
}

impl ReportPipeline {
    pub fn new(
        config: PipelineConfig,
        template: &PromptTemplate,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(config.max_dimension, config.scratch_dir),
            prompt: template.build_prompt(&config.schema),
            backend,
        }
    }

    /// Builds the production pipeline: Gemini backend plus the configured prompt.
    pub fn from_config(config: &Config) -> Result<Self, AnalysisError> {
        let template = config.prompt_template()?;
        let backend = Arc::new(GeminiClient::new(&config.inference)?);
        let pipeline_config = PipelineConfig {
            max_dimension: config.max_dimension,
            scratch_dir: config.temp_dir.clone(),
            schema: ReportSchema::default(),
        };
        Ok(Self::new(pipeline_config, &template, backend))
    }

    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }

    /// Runs one image through every stage.
    ///
    /// Decoding and resizing run on the blocking pool. Run this to completion
    /// (e.g. inside a spawned task) if the caller may go away mid-request, so
    /// the resized copy is always released by its guard.
    pub async fn analyze(&self, path: &Path) -> Result<Analysis, AnalysisError> {
        let span = info_span!("analysis", image = %path.display());
        async move {
            let mut stage = Stage::Received;
            let outcome = self.run_stages(path, &mut stage).await;
            match &outcome {
                Ok(analysis) => info!(
                    crack_level = %analysis.report.crack_level(),
                    danger_level = %analysis.report.danger_level(),
                    fallback = analysis.is_fallback(),
                    "analysis complete"
                ),
                Err(err) => warn!(
                    last_stage = %stage,
                    state = %Stage::Failed,
                    code = err.code(),
                    error = %err,
                    "analysis failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, path: &Path, stage: &mut Stage) -> Result<Analysis, AnalysisError> {
        // Stage 1: Format validation, before any I/O on the file.
        normalizer::ensure_supported_extension(path)?;
        advance(stage, Stage::Validated);

        // Stage 2: Decode and bound the image size.
        let normalizer = self.normalizer.clone();
        let owned = path.to_path_buf();
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&owned))
            .await
            .map_err(|e| AnalysisError::Internal(format!("normalization worker failed: {e}")))??;
        advance(stage, Stage::Normalized);

        // Stage 3: Assemble the request parts.
        let image = ImagePayload::load(normalized.path(), normalized.format()).await?;
        let request = InferenceRequest {
            instruction: self.prompt.instruction.clone(),
            schema_text: self.prompt.schema_text.clone(),
            image,
        };
        advance(stage, Stage::Prompted);

        // Stage 4: The remote call. Exactly one attempt.
        let raw_text = self.backend.infer(&request).await?;
        let sent_dimensions = normalized.dimensions();
        drop(normalized);
        advance(stage, Stage::Inferred);

        // Stage 5: Coercion never fails; bad output becomes the fallback.
        let coercion = coercer::coerce_detailed(&raw_text);
        if let Some(violation) = coercion.violation() {
            warn!(%violation, "model output rejected; emitting fallback report");
        }
        advance(stage, Stage::Coerced);

        let violation = coercion.violation().cloned();
        let report = coercion.into_report();
        advance(stage, Stage::Emitted);
        Ok(Analysis {
            report,
            violation,
            sent_dimensions,
        })
    }
}

fn advance(current: &mut Stage, next: Stage) {
    debug!(from = %current, to = %next, "stage transition");
    *current = next;
}
