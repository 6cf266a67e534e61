//! Directory mode: analyze every supported image, one after another.

use aging_vision::normalizer::SUPPORTED_EXTENSIONS;
use aging_vision::sink::{self, BatchLedger};
use aging_vision::ReportPipeline;
use anyhow::{Context, bail};
use std::path::{Path, PathBuf};

/// Supported image files directly inside `dir`, in name order.
pub fn collect_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("directory not found: {}", dir.display());
    }
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && has_supported_extension(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub async fn run(pipeline: &ReportPipeline, dir: &Path, output_dir: &Path) -> anyhow::Result<()> {
    let images = collect_images(dir)?;
    if images.is_empty() {
        println!("No image files found in {}", dir.display());
        return Ok(());
    }

    let mut ledger = BatchLedger::new();
    for (index, image) in images.iter().enumerate() {
        println!(
            "\n[{}/{}] Processing: {}",
            index + 1,
            images.len(),
            image.file_name().unwrap_or_default().to_string_lossy()
        );
        // A failing image is recorded and the batch moves on.
        let written = match pipeline.analyze(image).await {
            Ok(analysis) => {
                println!("{}", serde_json::to_string_pretty(&analysis.report)?);
                sink::write_report(output_dir, image, &analysis.report).map(|_| analysis.report)
            }
            Err(err) => Err(err),
        };
        match written {
            Ok(report) => ledger.record_report(image, report),
            Err(err) => {
                println!("Analysis error: {err}");
                ledger.record_error(image, &err);
            }
        }
    }

    let files = ledger.finish(output_dir)?;
    println!(
        "\nAnalyzed {} image(s), {} error(s)",
        ledger.results().len(),
        ledger.errors().len()
    );
    println!("Summary saved: {}", files.summary.display());
    println!("Errors saved: {}", files.errors.display());
    Ok(())
}
