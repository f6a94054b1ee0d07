use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db;
use crate::services::{
    fetcher::{FetchError, HttpImageFetcher},
    pipeline::Pipeline,
    queue::{JobStore, QueueError},
    records::{ImageRecordGateway, PgImageRecords},
    redis_queue::RedisJobQueue,
    search::{SearchError, UnsplashClient},
    status::JobStatusReader,
    tagging::{ImaggaClient, TaggingError},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobStore>,
    pub records: Arc<dyn ImageRecordGateway>,
    pub status: JobStatusReader,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobStore>,
        records: Arc<dyn ImageRecordGateway>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            status: JobStatusReader::new(queue.clone()),
            queue,
            records,
            upload_dir: upload_dir.into(),
        }
    }

    /// Connect to PostgreSQL and Redis, running migrations on the way.
    pub async fn connect(config: &AppConfig) -> Result<Self, BootstrapError> {
        tracing::info!("Connecting to PostgreSQL database");
        let pool = db::init_pool(&config.database_url).await?;

        tracing::info!("Running database migrations");
        db::run_migrations(&pool).await?;

        tracing::info!(queue = %config.queue_name, "Connecting to Redis job queue");
        let queue =
            RedisJobQueue::new(&config.redis_url(), &config.queue_name)?.with_retention(config.job_retention());
        queue.health_check().await?;

        Ok(Self::new(
            Arc::new(queue),
            Arc::new(PgImageRecords::new(pool)),
            config.upload_dir.clone(),
        ))
    }

    /// Build the processing pipeline around this state's record gateway.
    pub fn pipeline(&self, config: &AppConfig) -> Result<Pipeline, BootstrapError> {
        let timeouts = config.stage_timeouts();

        tracing::info!("Initializing tagging, search and download clients");
        let tagger = ImaggaClient::new(
            &config.imagga_base_url,
            &config.imagga_api_key,
            &config.imagga_api_secret,
            timeouts.tagging,
        )?;
        let search = UnsplashClient::new(&config.unsplash_base_url, &config.unsplash_access_key, timeouts.search)?;
        let fetcher = HttpImageFetcher::new(timeouts.fetch)?;

        Ok(Pipeline::new(
            Arc::new(tagger),
            self.records.clone(),
            Arc::new(search),
            Arc::new(fetcher),
            config.download_dir.clone(),
        )
        .with_naming(config.download_naming)
        .with_timeouts(timeouts))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Tagging client setup failed: {0}")]
    Tagging(#[from] TaggingError),

    #[error("Search client setup failed: {0}")]
    Search(#[from] SearchError),

    #[error("Image fetcher setup failed: {0}")]
    Fetcher(#[from] FetchError),
}
