// THEORY:
// This file is the main entry point for the `aging_vision` library crate.
// It defines the public API consumed by the HTTP service and the command-line
// runner.
//
// The primary export is `ReportPipeline`, which takes the path of a building
// photograph and returns an `AgingReport`: a crack level from 0 to 5, a danger
// level of low/medium/high, and at most two short reasons. Everything the
// pipeline needs (normalizing the image, assembling the prompt, the single
// remote model call, and turning free-form model text into a trusted report)
// lives in its own module, so each step can be tested on its own.
//
// Model output is never trusted as-is. The `coercer` is the only place a
// report is built from model text, and when that text does not satisfy the
// report schema exactly, a fallback report is produced instead of an error.

pub mod coercer;
pub mod config;
pub mod error;
pub mod inference;
pub mod normalizer;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod sink;
pub mod telemetry;
pub mod transient;

pub use coercer::{Coercion, coerce};
pub use config::{Config, InferenceConfig};
pub use error::{AnalysisError, ConfigError, ProcessingStage, SchemaViolation};
pub use pipeline::{Analysis, PipelineConfig, ReportPipeline};
pub use report::{AgingReport, CrackLevel, DangerLevel};
