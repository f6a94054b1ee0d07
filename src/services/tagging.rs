use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::image::Keyword;
use crate::services::outcome::ServiceOutcome;

/// Tags at or below this confidence are dropped.
pub const MIN_CONFIDENCE: f64 = 20.0;

/// At most this many tags are kept per image.
pub const MAX_KEYWORDS: usize = 5;

/// Derives keywords for a local image file.
///
/// Implementations never fail: any transport, auth or parse error is reported
/// as [`ServiceOutcome::Degraded`], which callers treat as an empty keyword list.
#[async_trait]
pub trait KeywordTagger: Send + Sync {
    async fn extract_keywords(&self, image_path: &Path) -> ServiceOutcome<Keyword>;
}

/// Keep tags above [`MIN_CONFIDENCE`], then the first [`MAX_KEYWORDS`] in service order.
pub fn select_keywords(tags: Vec<Keyword>) -> Vec<Keyword> {
    tags.into_iter()
        .filter(|k| k.confidence > MIN_CONFIDENCE)
        .take(MAX_KEYWORDS)
        .collect()
}

/// Client for the Imagga tagging API.
pub struct ImaggaClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    result: UploadResult,
}

#[derive(Deserialize)]
struct UploadResult {
    upload_id: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    result: TagsResult,
}

#[derive(Deserialize)]
struct TagsResult {
    tags: Vec<Keyword>,
}

impl ImaggaClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        api_secret: &str,
        timeout: Duration,
    ) -> Result<Self, TaggingError> {
        let http = Client::builder()
            .user_agent(concat!("image-keyword-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(TaggingError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// Upload the image, then fetch tags for the returned upload id.
    pub async fn try_extract_keywords(&self, image_path: &Path) -> Result<Vec<Keyword>, TaggingError> {
        let bytes = tokio::fs::read(image_path).await.map_err(TaggingError::Read)?;
        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));

        let upload: UploadResponse = self
            .http
            .post(format!("{}/v2/uploads", self.base_url))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(upload_id = %upload.result.upload_id, "Image uploaded to tagging service");

        let tags: TagsResponse = self
            .http
            .get(format!("{}/v2/tags", self.base_url))
            .query(&[("image_upload_id", upload.result.upload_id.as_str())])
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(select_keywords(tags.result.tags))
    }
}

#[async_trait]
impl KeywordTagger for ImaggaClient {
    async fn extract_keywords(&self, image_path: &Path) -> ServiceOutcome<Keyword> {
        self.try_extract_keywords(image_path)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    image_path = %image_path.display(),
                    error = %e,
                    "Keyword extraction failed, continuing without keywords"
                )
            })
            .into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaggingError {
    #[error("Failed to read image: {0}")]
    Read(#[source] std::io::Error),

    #[error("Tagging request failed: {0}")]
    Http(#[from] reqwest::Error),
}
