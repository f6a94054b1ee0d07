use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::Utc;
use garde::Validate;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::image::{is_allowed_mimetype, NewImage, MAX_UPLOAD_BYTES};
use crate::models::job::{JobId, JobPayload, JobStatusResponse};
use crate::routes::ApiError;

/// Response after an upload is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub job_id: JobId,
}

struct UploadedFile {
    original_name: String,
    mimetype: String,
    data: axum::body::Bytes,
}

/// POST /image: store an uploaded image and queue it for processing.
///
/// Expects the file in multipart field `image`. Only jpeg/jpg/png up to
/// 2 MiB are accepted; anything else is rejected with 422.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let mimetype = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        upload = Some(UploadedFile {
            original_name,
            mimetype,
            data,
        });
    }

    let upload = upload.ok_or(ApiError::MissingFile)?;
    let format = check_upload(&upload)?;

    let filename = format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension(&upload.original_name, format)
    );
    let path = state.upload_dir.join(&filename);
    let new_image = NewImage {
        filename,
        mimetype: upload.mimetype,
        path: path.display().to_string(),
        size: upload.data.len() as u64,
    };
    new_image
        .validate()
        .map_err(|e| ApiError::InvalidUpload(e.to_string()))?;

    tokio::fs::create_dir_all(&state.upload_dir).await?;
    tokio::fs::write(&path, &upload.data).await?;

    let record = match state.records.create(&new_image).await {
        Ok(record) => record,
        Err(e) => {
            if let Err(io) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %io, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    let job = state
        .queue
        .enqueue(JobPayload {
            image_path: new_image.path,
            image_id: record.id,
        })
        .await?;
    metrics::counter!("image_jobs_enqueued_total").increment(1);

    tracing::info!(job_id = %job.id, image_id = %record.id, size = new_image.size, "Image uploaded, job enqueued");

    Ok(Json(UploadResponse {
        message: "Image uploaded successfully, processing started".to_string(),
        job_id: job.id,
    }))
}

/// Check declared type, size and actual content of an upload.
fn check_upload(upload: &UploadedFile) -> Result<ImageFormat, ApiError> {
    if !is_allowed_mimetype(&upload.mimetype) {
        return Err(ApiError::InvalidUpload(format!(
            "Unsupported file type '{}': expected jpeg, jpg or png",
            upload.mimetype
        )));
    }
    if upload.data.len() as u64 > MAX_UPLOAD_BYTES {
        return Err(ApiError::InvalidUpload(format!(
            "File is {} bytes; the limit is {} bytes",
            upload.data.len(),
            MAX_UPLOAD_BYTES
        )));
    }

    // Validate image content using the `image` crate
    match image::guess_format(&upload.data) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Ok(format),
        _ => Err(ApiError::InvalidUpload(
            "File content is not a jpeg or png image".to_string(),
        )),
    }
}

/// Keep the client's extension when it has one, else use the detected format.
fn extension(original_name: &str, format: ImageFormat) -> String {
    std::path::Path::new(original_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| format.extensions_str()[0].to_string())
}

/// GET /image/status/{id}: current state, progress and result of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    Ok(Json(state.status.status(&job_id).await?))
}
