use aging_vision::AnalysisError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

/// Error response: `{"error": {"code", "stage", "message"}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub stage: String,
    pub message: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: EnvelopeBody<'a>,
}

#[derive(Serialize)]
struct EnvelopeBody<'a> {
    code: &'a str,
    stage: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn missing_field(field: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "MissingField",
            stage: "validation".to_string(),
            message: format!("multipart field '{field}' is required"),
        }
    }

    pub fn from_multipart(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            code: "InvalidMultipart",
            stage: "validation".to_string(),
            message: err.body_text(),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            code: err.code(),
            stage: err.stage().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(
            status = self.status.as_u16(),
            code = self.code,
            stage = %self.stage,
            message = %self.message,
            "request failed"
        );
        let body = Envelope {
            error: EnvelopeBody {
                code: self.code,
                stage: &self.stage,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
