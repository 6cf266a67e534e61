//! Error types for the report pipeline.
//!
//! `AnalysisError` covers every way a single analysis request can fail before
//! a report exists. `SchemaViolation` describes why model output could not be
//! trusted; it never escapes the coercer as an error, it becomes the reason
//! line of a fallback report instead. `ConfigError` is raised at startup only.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The step of the pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Startup configuration, before any request exists.
    Configuration,
    /// Extension and content checks on the incoming image.
    Validation,
    /// Decoding and downscaling.
    Normalization,
    /// Assembling the request payload.
    Prompt,
    /// The remote model call.
    Inference,
    /// Writing reports or artifacts to local storage.
    Storage,
    /// Failures of the runtime itself (a worker panicked).
    Internal,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Configuration => write!(f, "configuration"),
            ProcessingStage::Validation => write!(f, "validation"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::Prompt => write!(f, "prompt"),
            ProcessingStage::Inference => write!(f, "inference"),
            ProcessingStage::Storage => write!(f, "storage"),
            ProcessingStage::Internal => write!(f, "internal"),
        }
    }
}

/// Everything that can stop an analysis request from producing a report.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The file extension or decoded content is not PNG, JPEG, WEBP or BMP.
    #[error(
        "unsupported image format '{found}' for {}: expected one of png, jpg, jpeg, webp, bmp",
        path.display()
    )]
    UnsupportedFormat { path: PathBuf, found: String },

    /// The file could not be opened or decoded as an image.
    #[error("failed to read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The resized image could not be encoded to scratch storage.
    #[error("failed to write resized image {}: {source}", path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The remote endpoint could not be reached.
    #[error("transport error contacting {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote call did not finish within the configured timeout.
    #[error("inference request timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    /// The remote endpoint answered, but not with usable model output.
    #[error("upstream error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    UpstreamError { status: Option<u16>, message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AnalysisError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable identifier used in HTTP error envelopes and batch error files.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::UnsupportedFormat { .. } => "UnsupportedFormat",
            AnalysisError::ImageRead { .. } => "ImageReadError",
            AnalysisError::ImageWrite { .. } => "ImageWriteError",
            AnalysisError::Transport { .. } => "TransportError",
            AnalysisError::Timeout { .. } => "Timeout",
            AnalysisError::UpstreamError { .. } => "UpstreamError",
            AnalysisError::Configuration(_) => "ConfigurationError",
            AnalysisError::Io { .. } => "IoError",
            AnalysisError::Internal(_) => "InternalError",
        }
    }

    pub fn stage(&self) -> ProcessingStage {
        match self {
            AnalysisError::UnsupportedFormat { .. } => ProcessingStage::Validation,
            AnalysisError::ImageRead { .. } | AnalysisError::ImageWrite { .. } => {
                ProcessingStage::Normalization
            }
            AnalysisError::Transport { .. }
            | AnalysisError::Timeout { .. }
            | AnalysisError::UpstreamError { .. } => ProcessingStage::Inference,
            AnalysisError::Configuration(_) => ProcessingStage::Configuration,
            AnalysisError::Io { .. } => ProcessingStage::Storage,
            AnalysisError::Internal(_) => ProcessingStage::Internal,
        }
    }

    /// Whether the caller sent something the pipeline refuses outright.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalysisError::UnsupportedFormat { .. })
    }
}

/// Why a piece of model output was not accepted as a report.
///
/// The `Display` text is exactly the reason line placed in the fallback report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("JSON parse error: expected an object, found {0}")]
    NotAnObject(&'static str),

    #[error("missing key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set; the model provider credential is required")]
    MissingCredential(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("prompt template {}: {reason}", path.display())]
    PromptTemplate { path: PathBuf, reason: String },
}
