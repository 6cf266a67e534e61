//! Process configuration, read once at startup and passed down explicitly.
//!
//! Nothing below the binaries reads the environment: the credential and every
//! tunable travel inside `Config` and `InferenceConfig`.

use crate::error::ConfigError;
use crate::normalizer::DEFAULT_MAX_DIMENSION;
use crate::prompt::PromptTemplate;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 256;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Settings for the remote model call.
#[derive(Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
}

impl InferenceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub inference: InferenceConfig,
    pub max_dimension: u32,
    pub prompt_path: Option<PathBuf>,
    pub bind_addr: String,
    pub temp_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = var(API_KEY_VAR).ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;
        let timeout_secs = positive(&var, "AGING_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let inference = InferenceConfig {
            api_key,
            api_base: var("AGING_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: var("AGING_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            max_output_tokens: positive(&var, "AGING_MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?,
        };

        Ok(Self {
            inference,
            max_dimension: positive(&var, "AGING_MAX_DIMENSION", DEFAULT_MAX_DIMENSION)?,
            prompt_path: var("AGING_PROMPT_PATH").map(PathBuf::from),
            bind_addr: var("AGING_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            temp_dir: var("AGING_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("aging_vision")),
            max_upload_bytes: positive(&var, "AGING_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }

    pub fn prompt_template(&self) -> Result<PromptTemplate, ConfigError> {
        match &self.prompt_path {
            Some(path) => PromptTemplate::from_file(path),
            None => Ok(PromptTemplate::default()),
        }
    }
}

fn positive<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
