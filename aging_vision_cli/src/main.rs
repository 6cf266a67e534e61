mod batch;
mod client;

use aging_vision::{Config, ReportPipeline, sink, telemetry};
use anyhow::{Context, bail};
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};

/// Assess the aging state of buildings from photographs.
#[derive(Debug, Parser)]
#[command(name = "aging-vision", version, about)]
#[command(group(ArgGroup::new("input").required(true).args(["image_path", "dir"])))]
struct Cli {
    /// Image to analyze (png, jpg, jpeg, webp, bmp).
    image_path: Option<PathBuf>,

    /// Analyze every supported image in this directory instead.
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Where report files are written.
    #[arg(long, value_name = "DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Send the image to a running aging-vision-server at this base URL
    /// instead of calling the model directly.
    #[arg(long, value_name = "URL", conflicts_with = "dir", requires = "image_path")]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    // --- 2. API Client Mode ---
    // The server holds the credential, so no local configuration is needed.
    if let (Some(api_url), Some(image)) = (&cli.api_url, &cli.image_path) {
        let client = client::ApiClient::new(api_url, client::REQUEST_TIMEOUT)?;
        client.run(image, &cli.output_dir).await?;
        return Ok(());
    }

    // --- 3. Pipeline Initialization ---
    let config = Config::from_env().context("invalid configuration")?;
    let pipeline = ReportPipeline::from_config(&config).context("failed to build report pipeline")?;

    // --- 4. Dispatch ---
    match (&cli.dir, &cli.image_path) {
        (Some(dir), _) => batch::run(&pipeline, dir, &cli.output_dir).await,
        (None, Some(image)) => run_single(&pipeline, image, &cli.output_dir).await,
        (None, None) => bail!("either an image path or --dir is required"),
    }
}

async fn run_single(pipeline: &ReportPipeline, image: &Path, output_dir: &Path) -> anyhow::Result<()> {
    println!("Analyzing: {}", image.display());
    let analysis = pipeline
        .analyze(image)
        .await
        .with_context(|| format!("analysis failed for {}", image.display()))?;
    if let Some(violation) = &analysis.violation {
        println!("Warning: model output was not usable ({violation}); reporting fallback");
    }

    println!("\nAnalysis result:");
    println!("{}", serde_json::to_string_pretty(&analysis.report)?);

    let path = sink::write_report(output_dir, image, &analysis.report)?;
    println!("\nReport saved: {}", path.display());
    Ok(())
}
