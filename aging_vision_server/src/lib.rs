// THEORY:
// The HTTP face of the report pipeline. It is thin: it accepts an
// upload, parks it in the temp directory under a unique name, hands the path
// to `ReportPipeline`, and turns the outcome into either the report JSON or an
// error envelope.
//
// Each analysis runs in its own spawned task that owns the stored upload. The
// handler only awaits that task, so a client that disconnects mid-request
// drops the handler future but not the task; the upload and any resized copy
// are still removed when the task finishes.
//
// `start_server` binds before spawning the serve loop; bind errors are
// returned to the caller.

mod api_error;

pub use api_error::ApiError;

use aging_vision::normalizer::{self, SUPPORTED_EXTENSIONS};
use aging_vision::transient::{TransientFile, purge_dir, sanitize_file_name};
use aging_vision::{AgingReport, AnalysisError, ReportPipeline};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub temp_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn from_config(config: &aging_vision::Config) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            temp_dir: config.temp_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReportPipeline>,
    /// Where uploads are stored while their analysis runs.
    pub temp_dir: PathBuf,
}

impl AppState {
    pub fn new(pipeline: Arc<ReportPipeline>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            temp_dir: temp_dir.into(),
        }
    }
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/analyze", post(analyze_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(from_fn(cors_middleware))
        .with_state(state)
}

/// Stops a running server.
#[derive(Clone)]
pub struct ControlHandle {
    pub shutdown_tx: watch::Sender<bool>,
}

impl ControlHandle {
    /// Asks the server to stop accepting connections and drain in-flight ones.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub control: ControlHandle,
    pub task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Triggers graceful shutdown and waits for the serve loop to end.
    pub async fn stop(self) {
        self.control.shutdown();
        let _ = self.task.await;
    }
}

pub async fn start_server(state: AppState, cfg: ServerConfig) -> anyhow::Result<ServerHandle> {
    tokio::fs::create_dir_all(&cfg.temp_dir).await?;
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let app = build_router(state, cfg.max_upload_bytes);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(%local_addr, "aging vision server listening");
        let shutdown = async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "server terminated with error");
        }
        info!("aging vision server stopped");
    });

    Ok(ServerHandle {
        local_addr,
        control: ControlHandle { shutdown_tx },
        task,
    })
}

/// Removes files an earlier run left in the temp directory; returns how many.
pub async fn purge_temp_dir(dir: &Path) -> usize {
    let owned = dir.to_path_buf();
    match tokio::task::spawn_blocking(move || purge_dir(&owned)).await {
        Ok(Ok(0)) => 0,
        Ok(Ok(removed)) => {
            info!(dir = %dir.display(), removed, "purged stale temporary files");
            removed
        }
        Ok(Err(e)) => {
            warn!(dir = %dir.display(), error = %e, "failed to purge temporary directory");
            0
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "temporary directory purge task failed");
            0
        }
    }
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Building aging assessment API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "service description",
            "GET /health": "liveness check",
            "POST /analyze": format!(
                "multipart field '{UPLOAD_FIELD}' with a {} image; returns crack_level, danger_level, reasons",
                SUPPORTED_EXTENSIONS.join("/")
            ),
        }
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::from_multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
        let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
        return Ok(Upload {
            file_name,
            bytes: bytes.to_vec(),
        });
    }
    Err(ApiError::missing_field(UPLOAD_FIELD))
}

async fn analyze_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AgingReport>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("analyze_request", %request_id);
    async move {
        let upload = read_upload(&mut multipart).await?;
        info!(file_name = %upload.file_name, bytes = upload.bytes.len(), "upload received");

        // Unsupported uploads never touch the disk.
        normalizer::ensure_supported_extension(Path::new(&upload.file_name))?;

        let stored = TransientFile::persist(&state.temp_dir, &upload.file_name, &upload.bytes)
            .await
            .map_err(|e| AnalysisError::io("failed to store upload", e))?;

        let pipeline = state.pipeline.clone();
        let task = tokio::spawn(
            async move {
                let outcome = pipeline.analyze(stored.path()).await;
                drop(stored);
                outcome
            }
            .instrument(Span::current()),
        );
        let analysis = task
            .await
            .map_err(|e| AnalysisError::Internal(format!("analysis task failed: {e}")))??;
        Ok::<_, ApiError>(Json(analysis.report))
    }
    .instrument(span)
    .await
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        let headers = resp.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,POST,OPTIONS"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
        return resp;
    }

    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}
