use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::image::{ImageFilter, ImageRecord, ImageStatus, ImageUpdate, NewImage};

const IMAGE_COLUMNS: &str = "id, url, title, width, height, status, created_at, deleted_at";

fn image_from_row(row: &PgRow) -> Result<ImageRecord, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<ImageStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(ImageRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        status,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// Insert a new image record
pub async fn create_image(pool: &PgPool, data: &NewImage) -> Result<ImageRecord, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO images (url, title, width, height, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {IMAGE_COLUMNS}
        "#
    ))
    .bind(&data.url)
    .bind(data.title.as_deref())
    .bind(data.width)
    .bind(data.height)
    .bind(data.status.to_string())
    .fetch_one(pool)
    .await?;

    image_from_row(&row)
}

/// Get an image by ID, including soft-deleted ones
pub async fn get_image(pool: &PgPool, image_id: Uuid) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {IMAGE_COLUMNS}
        FROM images
        WHERE id = $1
        "#
    ))
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Apply a partial update.
///
/// A status change is only applied while the record is PROCESSING or already
/// has that status; otherwise no row is returned.
pub async fn update_image(
    pool: &PgPool,
    image_id: Uuid,
    update: &ImageUpdate,
) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE images
        SET url = COALESCE($2, url),
            width = COALESCE($3, width),
            height = COALESCE($4, height),
            status = COALESCE($5, status),
            updated_at = NOW()
        WHERE id = $1
          AND ($5::text IS NULL OR status = 'PROCESSING' OR status = $5)
        RETURNING {IMAGE_COLUMNS}
        "#
    ))
    .bind(image_id)
    .bind(update.url.as_deref())
    .bind(update.width)
    .bind(update.height)
    .bind(update.status.map(|s| s.to_string()))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Mark an image deleted. Returns false if no such image exists.
pub async fn soft_delete_image(pool: &PgPool, image_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE images
        SET deleted_at = COALESCE(deleted_at, NOW()),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(image_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List active images newest-first with the total matching count
pub async fn list_images(
    pool: &PgPool,
    filter: &ImageFilter,
    page: u32,
    limit: u32,
) -> Result<(Vec<ImageRecord>, i64), sqlx::Error> {
    let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
    let title_pattern = filter.title.as_deref().map(|t| {
        let escaped = t.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{}%", escaped)
    });

    let rows = sqlx::query(&format!(
        r#"
        SELECT {IMAGE_COLUMNS}
        FROM images
        WHERE deleted_at IS NULL
          AND ($1::text IS NULL OR title ILIKE $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(title_pattern.as_deref())
    .bind(i64::from(limit))
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM images
        WHERE deleted_at IS NULL
          AND ($1::text IS NULL OR title ILIKE $1)
        "#,
    )
    .bind(title_pattern.as_deref())
    .fetch_one(pool)
    .await?;

    let images = rows.iter().map(image_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((images, total))
}
