//! Where finished reports go.
//!
//! The service path simply serializes the report as the response body, so
//! this module is about the batch/CLI path: one `<stem>.json` per image, and a
//! `BatchLedger` that collects successes and failures across a directory run
//! and writes them to fixed file names at the end.

use crate::error::AnalysisError;
use crate::report::AgingReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "analysis_summary.json";
pub const ERRORS_FILE: &str = "analysis_errors.json";

/// `<output_dir>/<source stem>.json`
pub fn report_path(output_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "report".to_string());
    output_dir.join(format!("{stem}.json"))
}

pub fn write_report(
    output_dir: &Path,
    source: &Path,
    report: &AgingReport,
) -> Result<PathBuf, AnalysisError> {
    let path = report_path(output_dir, source);
    write_json(output_dir, &path, report)?;
    Ok(path)
}

/// Reads a report file back; the same domain checks apply as for fresh reports.
pub fn read_report(path: &Path) -> Result<AgingReport, AnalysisError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::io(format!("failed to read {}", path.display()), e))?;
    serde_json::from_str(&raw).map_err(|e| {
        AnalysisError::io(
            format!("invalid report file {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

fn write_json<T: Serialize + ?Sized>(
    output_dir: &Path,
    path: &Path,
    value: &T,
) -> Result<(), AnalysisError> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        AnalysisError::io(
            format!("failed to create output directory {}", output_dir.display()),
            e,
        )
    })?;
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        AnalysisError::io(
            format!("failed to serialize {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    std::fs::write(path, json)
        .map_err(|e| AnalysisError::io(format!("failed to write {}", path.display()), e))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub image: String,
    pub report: AgingReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub image: String,
    pub error: String,
}

/// Paths written by `BatchLedger::finish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFiles {
    pub summary: PathBuf,
    pub errors: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchLedger {
    results: Vec<SummaryEntry>,
    errors: Vec<ErrorEntry>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_report(&mut self, source: &Path, report: AgingReport) {
        self.results.push(SummaryEntry {
            image: display_name(source),
            report,
        });
    }

    pub fn record_error(&mut self, source: &Path, error: &AnalysisError) {
        self.errors.push(ErrorEntry {
            image: display_name(source),
            error: error.to_string(),
        });
    }

    pub fn results(&self) -> &[SummaryEntry] {
        &self.results
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    /// Writes both collections, even when one of them is empty.
    pub fn finish(&self, output_dir: &Path) -> Result<BatchFiles, AnalysisError> {
        let files = BatchFiles {
            summary: output_dir.join(SUMMARY_FILE),
            errors: output_dir.join(ERRORS_FILE),
        };
        write_json(output_dir, &files.summary, &self.results)?;
        write_json(output_dir, &files.errors, &self.errors)?;
        Ok(files)
    }
}

fn display_name(source: &Path) -> String {
    source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}
