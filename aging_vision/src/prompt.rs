//! Instruction text and output-schema description sent with every image.
//!
//! Request parts go out as instruction, then schema, then image.

use crate::error::ConfigError;
use crate::report::{DangerLevel, MAX_CRACK_LEVEL, MAX_REASONS};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;

pub const DEFAULT_INSTRUCTION: &str = "\
You are a structural inspection assistant. Assess the aging and degradation of \
the building shown in the attached photograph. Rate visible cracking from 0 \
(no cracks) to 5 (severe, structural cracking), classify the overall danger as \
low, medium or high, and give at most two short reasons based on what is \
visible (cracks, spalling, exposed rebar, efflorescence, corrosion, \
deformation). Respond with a single JSON object that matches the output \
schema. Do not include markdown or any text outside the JSON object.";

/// Machine-readable shape of the report the model must return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchema {
    pub max_crack_level: u8,
    pub danger_levels: Vec<DangerLevel>,
    pub max_reasons: usize,
}

impl Default for ReportSchema {
    fn default() -> Self {
        Self {
            max_crack_level: MAX_CRACK_LEVEL,
            danger_levels: DangerLevel::ALL.to_vec(),
            max_reasons: MAX_REASONS,
        }
    }
}

impl ReportSchema {
    pub fn describe(&self) -> Value {
        let danger: Vec<&str> = self.danger_levels.iter().map(|d| d.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "crack_level": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": self.max_crack_level,
                    "description": "crack severity, 0 = none"
                },
                "danger_level": {
                    "type": "string",
                    "enum": danger
                },
                "reasons": {
                    "type": "array",
                    "items": { "type": "string" },
                    "maxItems": self.max_reasons,
                    "description": "short observations supporting the assessment"
                }
            },
            "required": ["crack_level", "danger_level", "reasons"]
        })
    }
}

/// The two text parts that precede the image in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub instruction: String,
    pub schema_text: String,
}

/// On-disk template: `{"system_prompt": "...", "output_schema": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    system_prompt: String,
    #[serde(default)]
    output_schema: Option<Value>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_INSTRUCTION.to_string(),
            output_schema: None,
        }
    }
}

impl PromptTemplate {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::PromptTemplate {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let template: PromptTemplate =
            serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
        if template.system_prompt.trim().is_empty() {
            return Err(invalid("system_prompt is empty".to_string()));
        }
        Ok(template)
    }

    /// Merges the instruction with the schema description. Pure.
    pub fn build_prompt(&self, schema: &ReportSchema) -> Prompt {
        let description = self
            .output_schema
            .clone()
            .unwrap_or_else(|| schema.describe());
        Prompt {
            instruction: self.system_prompt.trim().to_string(),
            schema_text: format!("Output schema: {description}"),
        }
    }
}

pub fn build_prompt(schema: &ReportSchema) -> Prompt {
    PromptTemplate::default().build_prompt(schema)
}
