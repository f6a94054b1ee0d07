use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::image::{ImageRecord, Keyword, NewImage};

fn image_from_row(row: &PgRow) -> Result<ImageRecord, sqlx::Error> {
    let keywords: Json<Vec<Keyword>> = row.try_get("keywords")?;
    Ok(ImageRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        mimetype: row.try_get("mimetype")?,
        path: row.try_get("path")?,
        size: row.try_get("size")?,
        keywords: keywords.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new image record
pub async fn create_image(pool: &PgPool, image: &NewImage) -> Result<ImageRecord, sqlx::Error> {
    let size = i64::try_from(image.size).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let row = sqlx::query(
        r#"
        INSERT INTO images (filename, mimetype, path, size)
        VALUES ($1, $2, $3, $4)
        RETURNING id, filename, mimetype, path, size, keywords, created_at, updated_at
        "#,
    )
    .bind(&image.filename)
    .bind(&image.mimetype)
    .bind(&image.path)
    .bind(size)
    .fetch_one(pool)
    .await?;

    image_from_row(&row)
}

/// Replace the keywords attached to an image.
/// Returns `None` when no image has this ID.
pub async fn update_keywords(
    pool: &PgPool,
    image_id: Uuid,
    keywords: &[Keyword],
) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE images
        SET keywords = $1,
            updated_at = NOW()
        WHERE id = $2
        RETURNING id, filename, mimetype, path, size, keywords, created_at, updated_at
        "#,
    )
    .bind(Json(keywords))
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}
