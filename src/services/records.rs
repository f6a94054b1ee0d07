use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::image::{ImageRecord, Keyword, NewImage};

/// Persistence for image records.
///
/// Unlike the external services, every failure here is returned to the
/// caller; a keyword write that does not land fails the job.
#[async_trait]
pub trait ImageRecordGateway: Send + Sync {
    async fn create(&self, image: &NewImage) -> Result<ImageRecord, RecordError>;

    async fn update_keywords(&self, image_id: Uuid, keywords: &[Keyword]) -> Result<ImageRecord, RecordError>;

    async fn health_check(&self) -> Result<(), RecordError>;
}

/// PostgreSQL-backed image records.
pub struct PgImageRecords {
    pool: PgPool,
}

impl PgImageRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageRecordGateway for PgImageRecords {
    async fn create(&self, image: &NewImage) -> Result<ImageRecord, RecordError> {
        Ok(queries::create_image(&self.pool, image).await?)
    }

    async fn update_keywords(&self, image_id: Uuid, keywords: &[Keyword]) -> Result<ImageRecord, RecordError> {
        queries::update_keywords(&self.pool, image_id, keywords)
            .await?
            .ok_or(RecordError::NotFound(image_id))
    }

    async fn health_check(&self) -> Result<(), RecordError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Image record not found: {0}")]
    NotFound(Uuid),
}
