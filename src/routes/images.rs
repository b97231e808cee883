use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::format::DEFAULT_MIME_TYPE;
use crate::models::image::ImageFilter;
use crate::models::upload::{
    ImageResponse, ListImagesQuery, PaginatedResponse, UploadOptions, UploadedFile,
};
use crate::services::validation::ValidationError;

/// POST /api/v1/images: upload an image for processing.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageResponse>), ApiError> {
    let mut file: Option<UploadedFile> = None;
    let mut options = UploadOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let mime = field
                    .content_type()
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                file = Some(UploadedFile::new(data.to_vec(), name, mime));
            }
            Some("title") => {
                let text = read_text(field).await?;
                options.title = (!text.is_empty()).then_some(text);
            }
            Some("width") => {
                let raw = read_text(field).await?;
                options.width = parse_dimension(&raw, ValidationError::InvalidWidth)?;
            }
            Some("height") => {
                let raw = read_text(field).await?;
                options.height = parse_dimension(&raw, ValidationError::InvalidHeight)?;
            }
            _ => {}
        }
    }

    options.validate()?;

    let record = state.images.upload_image(file, options).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /api/v1/images: paginated list of active images.
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ListImagesQuery>,
) -> Result<Json<PaginatedResponse<ImageResponse>>, ApiError> {
    query.validate()?;

    let page = state
        .images
        .list_images(ImageFilter { title: query.title }, query.page, query.limit)
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/images/{id}
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImageResponse>, ApiError> {
    let record = state.images.get_image(id).await?;
    Ok(Json(record.into()))
}

/// DELETE /api/v1/images/{id}
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.images.delete_image(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    let text = field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(text.trim().to_string())
}

/// Empty form values mean "not provided".
fn parse_dimension(raw: &str, invalid: ValidationError) -> Result<Option<f64>, ApiError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ApiError::bad_request(invalid.to_string()))
}
