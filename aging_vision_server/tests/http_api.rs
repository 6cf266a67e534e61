use aging_vision::inference::ScriptedBackend;
use aging_vision::prompt::PromptTemplate;
use aging_vision::{AnalysisError, PipelineConfig, ReportPipeline};
use aging_vision_server::{AppState, ServerConfig, ServerHandle, purge_temp_dir, start_server};
use image::{ImageFormat, RgbImage};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const SAMPLE_OUTPUT: &str = r#"{"crack_level":3,"danger_level":"high","reasons":["visible diagonal crack","spalling"]}"#;

struct TestServer {
    handle: ServerHandle,
    backend: Arc<ScriptedBackend>,
    temp: TempDir,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(backend: ScriptedBackend) -> Self {
        let temp = tempdir().expect("tempdir");
        let backend = Arc::new(backend);
        let pipeline = ReportPipeline::new(
            PipelineConfig::new(temp.path()),
            &PromptTemplate::default(),
            backend.clone(),
        );
        let cfg = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            temp_dir: temp.path().to_path_buf(),
            max_upload_bytes: 8 * 1024 * 1024,
        };
        let handle = start_server(AppState::new(Arc::new(pipeline), temp.path()), cfg)
            .await
            .expect("start server");
        Self {
            handle,
            backend,
            temp,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.handle.base_url())
    }

    async fn upload(&self, field: &str, file_name: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
        let form = Form::new().part(field.to_string(), Part::bytes(bytes).file_name(file_name.to_string()));
        let resp = self
            .client
            .post(self.url("/analyze"))
            .multipart(form)
            .send()
            .await
            .expect("send upload");
        let status = resp.status();
        let body = resp.json::<Value>().await.expect("json body");
        (status, body)
    }

    fn temp_is_empty(&self) -> bool {
        temp_is_empty(self.temp.path())
    }
}

fn temp_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]))
        .write_to(&mut out, format)
        .expect("encode fixture");
    out.into_inner()
}

#[tokio::test]
async fn analyze_returns_the_report_and_cleans_up() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let (status, body) = server
        .upload("file", "sample.jpg", encoded(1200, 800, ImageFormat::Jpeg))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"crack_level": 3, "danger_level": "high", "reasons": ["visible diagonal crack", "spalling"]})
    );
    assert_eq!(server.backend.calls(), 1);
    assert!(server.temp_is_empty(), "upload and resized copy must be removed");
}

#[tokio::test]
async fn unusable_model_output_still_answers_200_with_fallback() {
    let server = TestServer::start(ScriptedBackend::text("I cannot assess this.")).await;

    let (status, body) = server
        .upload("file", "wall.png", encoded(200, 100, ImageFormat::Png))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crack_level"], 0);
    assert_eq!(body["danger_level"], "low");
    let reason = body["reasons"][0].as_str().expect("reason");
    assert!(reason.starts_with("JSON parse error"));
    assert!(server.temp_is_empty());
}

#[tokio::test]
async fn gif_upload_is_rejected_with_400_before_inference() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let (status, body) = server.upload("file", "bad.gif", b"GIF89a".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UnsupportedFormat");
    assert_eq!(body["error"]["stage"], "validation");
    assert_eq!(server.backend.calls(), 0);
    assert!(server.temp_is_empty());
}

#[tokio::test]
async fn missing_file_field_is_a_400() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let (status, body) = server
        .upload("image", "sample.jpg", encoded(10, 10, ImageFormat::Jpeg))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MissingField");
    assert_eq!(server.backend.calls(), 0);
}

#[tokio::test]
async fn inference_timeout_is_a_500_and_cleans_up() {
    let server = TestServer::start(ScriptedBackend::failing(|| AnalysisError::Timeout {
        after: Duration::from_secs(60),
    }))
    .await;

    let (status, body) = server
        .upload("file", "roof.jpg", encoded(1500, 1500, ImageFormat::Jpeg))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "Timeout");
    assert_eq!(body["error"]["stage"], "inference");
    assert!(
        body["error"]["message"]
            .as_str()
            .expect("message")
            .contains("timed out")
    );
    assert!(server.temp_is_empty());
}

#[tokio::test]
async fn client_disconnect_does_not_stop_cleanup() {
    let server = TestServer::start(
        ScriptedBackend::text(SAMPLE_OUTPUT).with_delay(Duration::from_millis(1500)),
    )
    .await;

    let form = Form::new().part(
        "file",
        Part::bytes(encoded(1100, 700, ImageFormat::Png)).file_name("facade.png"),
    );
    let err = server
        .client
        .post(server.url("/analyze"))
        .multipart(form)
        .timeout(Duration::from_millis(400))
        .send()
        .await
        .expect_err("client gives up before the backend answers");
    assert!(err.is_timeout());
    assert!(!server.temp_is_empty(), "analysis is still holding the upload");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while server.backend.calls() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "backend was never called");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    while !server.temp_is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "upload left behind after disconnect");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.backend.calls(), 1);
}

#[tokio::test]
async fn corrupt_image_is_a_500_naming_normalization() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let (status, body) = server
        .upload("file", "broken.jpg", b"definitely not jpeg".to_vec())
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "ImageReadError");
    assert_eq!(body["error"]["stage"], "normalization");
    assert_eq!(server.backend.calls(), 0);
    assert!(server.temp_is_empty());
}

#[tokio::test]
async fn concurrent_uploads_are_independent() {
    let server = TestServer::start(
        ScriptedBackend::text(SAMPLE_OUTPUT).with_delay(Duration::from_millis(50)),
    )
    .await;

    let uploads = (0..6).map(|i| {
        // Same client-side name for every request; stored names must still differ.
        let bytes = encoded(1100 + i * 10, 700, ImageFormat::Png);
        server.upload("file", "same.png", bytes)
    });
    let results = futures::future::join_all(uploads).await;
    for (status, body) in results {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["crack_level"], 3);
    }
    assert_eq!(server.backend.calls(), 6);
    assert!(server.temp_is_empty());
}

#[tokio::test]
async fn client_path_components_are_stripped_from_upload_names() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let (status, _) = server
        .upload("file", "../../etc/photo.png", encoded(50, 50, ImageFormat::Png))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.temp_is_empty());
    assert!(!server.temp.path().parent().expect("parent").join("photo.png").exists());
}

#[tokio::test]
async fn root_and_health_describe_the_service() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(health, json!({"status": "ok"}));

    let root: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .expect("root")
        .json()
        .await
        .expect("json");
    assert!(root["message"].is_string());
    assert_eq!(root["version"], env!("CARGO_PKG_VERSION"));
    assert!(root["endpoints"]["POST /analyze"].is_string());
}

#[tokio::test]
async fn cors_preflight_and_headers() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;

    let preflight = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/analyze"))
        .header("origin", "http://example.test")
        .send()
        .await
        .expect("preflight");
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight.headers()["access-control-allow-origin"],
        "*"
    );

    let health = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(health.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn graceful_stop_ends_the_serve_loop() {
    let server = TestServer::start(ScriptedBackend::text(SAMPLE_OUTPUT)).await;
    let addr = server.handle.local_addr;
    server.handle.stop().await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn purge_removes_files_left_by_an_earlier_run() {
    let temp = tempdir().expect("tempdir");
    tokio::fs::write(temp.path().join("stale-upload.jpg"), b"left over")
        .await
        .expect("write stale upload");
    tokio::fs::write(temp.path().join("stale-resized.jpg"), b"left over")
        .await
        .expect("write stale copy");
    tokio::fs::create_dir(temp.path().join("nested"))
        .await
        .expect("nested dir");

    assert_eq!(purge_temp_dir(temp.path()).await, 2);
    assert!(temp.path().join("nested").is_dir(), "directories are left alone");
    assert_eq!(purge_temp_dir(&temp.path().join("missing")).await, 0);
}
