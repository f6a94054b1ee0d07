use axum::extract::multipart::MultipartError;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;
use crate::models::image::MAX_UPLOAD_BYTES;
use crate::services::queue::QueueError;
use crate::services::records::RecordError;

pub mod health;
pub mod image;
pub mod metrics;

/// Room for multipart framing around a maximum-size file.
const BODY_LIMIT: usize = MAX_UPLOAD_BYTES as usize + 64 * 1024;

/// Routes served by the API process, without the metrics endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/health", get(health::health_check))
        .route("/image", get(upload_form).post(image::upload_image))
        .route("/image/status/{id}", get(image::get_job_status))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
}

#[derive(Serialize)]
pub struct AliveResponse {
    pub message: &'static str,
}

/// GET /: liveness message.
async fn alive() -> Json<AliveResponse> {
    Json(AliveResponse {
        message: "App is alive",
    })
}

/// GET /image: browser upload form.
async fn upload_form() -> Html<&'static str> {
    Html(include_str!("../../static/upload.html"))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid multipart upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("No image file in field 'image'")]
    MissingFile,

    #[error("{0}")]
    InvalidUpload(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Records(#[from] RecordError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Multipart(e) => e.status(),
            ApiError::MissingFile | ApiError::InvalidUpload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Queue(QueueError::Redis(_)) | ApiError::Records(RecordError::Database(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Io(_) | ApiError::Queue(_) | ApiError::Records(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
