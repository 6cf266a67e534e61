//! API client mode: hand one image to a running aging-vision-server.

use aging_vision::normalizer;
use aging_vision::{AgingReport, DangerLevel};
use anyhow::{Context, bail};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const UPLOAD_FIELD: &str = "file";
const REPORT_SUFFIX: &str = "_api_report.json";

/// `<output_dir>/<source stem>_api_report.json`
pub fn api_report_path(output_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{stem}{REPORT_SUFFIX}"))
}

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ApiClient {
    /// `api_url` is the server base URL; a trailing `/analyze` is accepted too.
    pub fn new(api_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = api_url.trim_end_matches('/');
        let endpoint = if base.ends_with("/analyze") {
            base.to_string()
        } else {
            format!("{base}/analyze")
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Uploads one image and returns the server's report.
    pub async fn analyze(&self, image: &Path) -> anyhow::Result<AgingReport> {
        // Same gate as the server, checked before anything is sent.
        if !image.is_file() {
            bail!("file not found: {}", image.display());
        }
        normalizer::ensure_supported_extension(image)?;

        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("failed to read {}", image.display()))?;
        let file_name = image
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let form = Form::new().part(UPLOAD_FIELD, Part::bytes(bytes).file_name(file_name));

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.describe_send_error(e))?;
        if !status.is_success() {
            bail!("API returned {status}: {}", error_detail(&body));
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response from {}", self.endpoint))
    }

    /// Analyze, print, save `<stem>_api_report.json`, and flag high danger.
    pub async fn run(&self, image: &Path, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let name = image.file_name().unwrap_or_default().to_string_lossy();
        println!("Sending {name} to {} (waiting up to {}s)", self.endpoint(), self.timeout.as_secs());
        let report = self.analyze(image).await?;

        println!("\nAnalysis result:");
        println!("{}", serde_json::to_string_pretty(&report)?);

        let path = api_report_path(output_dir, image);
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;
        tokio::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nReport saved: {}", path.display());

        if report.danger_level() == DangerLevel::High {
            println!("\nWarning: this building is assessed as high danger!");
            println!("Reasons: {}", report.reasons().join(", "));
        }
        Ok(path)
    }

    fn describe_send_error(&self, err: reqwest::Error) -> anyhow::Error {
        if err.is_timeout() {
            anyhow::anyhow!(
                "request to {} timed out after {}s; the server may be overloaded or the image too large",
                self.endpoint,
                self.timeout.as_secs_f64()
            )
        } else if err.is_connect() {
            anyhow::anyhow!(
                "cannot connect to the API server at {}; is it running?",
                self.endpoint
            )
        } else {
            anyhow::Error::new(err).context(format!("request to {} failed", self.endpoint))
        }
    }
}

/// The `{code} at {stage}: {message}` line of an error envelope, or the raw body.
fn error_detail(body: &str) -> String {
    let envelope = serde_json::from_str::<Value>(body).ok();
    let error = envelope.as_ref().and_then(|v| v.get("error"));
    match error {
        Some(error) => format!(
            "{} at {}: {}",
            error["code"].as_str().unwrap_or("UnknownError"),
            error["stage"].as_str().unwrap_or("unknown"),
            error["message"].as_str().unwrap_or_default()
        ),
        None => body.trim().to_string(),
    }
}
