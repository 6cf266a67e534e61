// THEORY:
// `AgingReport` is the only domain entity of the system: the structured
// degradation assessment of a single photograph. It is built once per request
// from the model's raw text and never changes afterwards.
//
// Key architectural principles:
// 1.  **Valid by construction**: every field lives inside a type that cannot
//     hold an out-of-domain value. `CrackLevel` only admits 0..=5, `DangerLevel`
//     is a closed enum, and the reason list is length-checked by the only
//     constructor. Deserialization goes through the same constructor, so a
//     report read back from disk obeys the same rules as a fresh one.
// 2.  **A single safe default**: `AgingReport::fallback` is the one report the
//     system emits when it cannot trust upstream output. It is always the
//     least alarming assessment with the failure reason attached.

use crate::error::SchemaViolation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_CRACK_LEVEL: u8 = 5;
pub const MAX_REASONS: usize = 2;

/// Crack severity on a monotonic 0 (none) to 5 (severe) scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CrackLevel(u8);

impl CrackLevel {
    pub const NONE: CrackLevel = CrackLevel(0);

    pub fn new(level: u8) -> Result<Self, SchemaViolation> {
        if level > MAX_CRACK_LEVEL {
            return Err(SchemaViolation::InvalidValue {
                field: "crack_level",
                detail: format!("expected an integer between 0 and {MAX_CRACK_LEVEL}, found {level}"),
            });
        }
        Ok(CrackLevel(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CrackLevel {
    type Error = SchemaViolation;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        CrackLevel::new(level)
    }
}

impl From<CrackLevel> for u8 {
    fn from(level: CrackLevel) -> Self {
        level.0
    }
}

impl fmt::Display for CrackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse three-tier classification of how dangerous the observed damage is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    Low,
    Medium,
    High,
}

impl DangerLevel {
    pub const ALL: [DangerLevel; 3] = [DangerLevel::Low, DangerLevel::Medium, DangerLevel::High];

    pub fn as_str(self) -> &'static str {
        match self {
            DangerLevel::Low => "low",
            DangerLevel::Medium => "medium",
            DangerLevel::High => "high",
        }
    }

    /// Accepts the canonical labels in any case, plus the Japanese
    /// 低 / 中 / 高 labels older prompts asked the model to use. Surrounding
    /// whitespace is not stripped; `" high "` is out of domain.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "low" | "低" => Some(DangerLevel::Low),
            "medium" | "中" => Some(DangerLevel::Medium),
            "high" | "高" => Some(DangerLevel::High),
            _ => None,
        }
    }
}

impl FromStr for DangerLevel {
    type Err = SchemaViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DangerLevel::parse_label(s).ok_or_else(|| SchemaViolation::InvalidValue {
            field: "danger_level",
            detail: format!("expected one of low, medium, high, found {s:?}"),
        })
    }
}

impl fmt::Display for DangerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured degradation assessment of a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ReportRecord")]
pub struct AgingReport {
    crack_level: CrackLevel,
    danger_level: DangerLevel,
    reasons: Vec<String>,
}

/// Wire shape used only to route deserialization through `AgingReport::new`.
#[derive(Deserialize)]
struct ReportRecord {
    crack_level: CrackLevel,
    danger_level: DangerLevel,
    reasons: Vec<String>,
}

impl TryFrom<ReportRecord> for AgingReport {
    type Error = SchemaViolation;

    fn try_from(record: ReportRecord) -> Result<Self, Self::Error> {
        AgingReport::new(record.crack_level, record.danger_level, record.reasons)
    }
}

impl AgingReport {
    pub fn new(
        crack_level: CrackLevel,
        danger_level: DangerLevel,
        reasons: Vec<String>,
    ) -> Result<Self, SchemaViolation> {
        if reasons.len() > MAX_REASONS {
            return Err(SchemaViolation::InvalidValue {
                field: "reasons",
                detail: format!(
                    "expected at most {MAX_REASONS} entries, found {}",
                    reasons.len()
                ),
            });
        }
        Ok(Self {
            crack_level,
            danger_level,
            reasons,
        })
    }

    /// The safe default emitted whenever model output cannot be trusted.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            crack_level: CrackLevel::NONE,
            danger_level: DangerLevel::Low,
            reasons: vec![reason.into()],
        }
    }

    pub fn crack_level(&self) -> CrackLevel {
        self.crack_level
    }

    pub fn danger_level(&self) -> DangerLevel {
        self.danger_level
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}
