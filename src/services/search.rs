use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::services::outcome::ServiceOutcome;

/// Number of related images requested per search.
pub const RESULTS_PER_SEARCH: u32 = 2;

/// Finds related images for a free-text query.
///
/// Implementations never fail: errors come back as [`ServiceOutcome::Degraded`].
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search(&self, query: &str) -> ServiceOutcome<String>;
}

/// Client for the Unsplash photo search API.
pub struct UnsplashClient {
    http: Client,
    base_url: String,
    access_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<Photo>,
}

#[derive(Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Deserialize)]
struct PhotoUrls {
    full: String,
}

impl UnsplashClient {
    pub fn new(base_url: &str, access_key: &str, timeout: Duration) -> Result<Self, SearchError> {
        let http = Client::builder()
            .user_agent(concat!("image-keyword-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
        })
    }

    /// Full-resolution URLs of the top results, in response order.
    pub async fn try_search(&self, query: &str) -> Result<Vec<String>, SearchError> {
        let per_page = RESULTS_PER_SEARCH.to_string();
        let response: SearchResponse = self
            .http
            .get(format!("{}/search/photos", self.base_url))
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("client_id", self.access_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .results
            .into_iter()
            .take(RESULTS_PER_SEARCH as usize)
            .map(|photo| photo.urls.full)
            .collect())
    }
}

#[async_trait]
impl ImageSearch for UnsplashClient {
    async fn search(&self, query: &str) -> ServiceOutcome<String> {
        self.try_search(query)
            .await
            .inspect_err(|e| tracing::warn!(query = %query, error = %e, "Image search failed, continuing without results"))
            .into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),
}
