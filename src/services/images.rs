use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::{ImageRepository, RepositoryError};
use crate::models::format::ImageFormat;
use crate::models::image::{
    ImageFilter, ImagePage, ImageRecord, ImageStatus, ImageUpdate, NewImage,
};
use crate::models::job::{EnqueueOptions, ProcessingJob};
use crate::models::upload::{UploadOptions, UploadedFile, ValidatedImage};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::staging::{StagingError, StagingStore};
use crate::services::validation::{ImageFileValidator, ValidationError};

/// Format used when the uploaded bytes did not reveal one.
const DEFAULT_FORMAT: ImageFormat = ImageFormat::Jpeg;

/// Errors surfaced by the image service.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Image with ID {0} not found")]
    NotFound(Uuid),

    #[error("Image with ID {0} has been deleted")]
    Deleted(Uuid),

    #[error("{0}")]
    InvalidDimensions(String),

    /// Upload failed after validation. The cause is kept for logging only.
    #[error("Failed to upload image")]
    UploadFailed {
        image_id: Option<Uuid>,
        #[source]
        source: UploadStageError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// The upload step that failed.
#[derive(Debug, thiserror::Error)]
pub enum UploadStageError {
    #[error("creating image record failed: {0}")]
    Create(#[source] RepositoryError),

    #[error("staging upload failed: {0}")]
    Stage(#[source] StagingError),

    #[error("enqueueing processing job failed: {0}")]
    Enqueue(#[source] QueueError),
}

/// Upload orchestration plus the read side of the image API.
///
/// An upload creates the record, stages the bytes, then enqueues exactly one
/// processing job keyed by the record id, and returns while the record is
/// still PROCESSING. Any failure after the record exists removes the staged
/// file and marks the record FAILED before the error is returned.
pub struct ImageService {
    repository: Arc<dyn ImageRepository>,
    staging: StagingStore,
    queue: Arc<dyn JobQueue>,
    validator: ImageFileValidator,
    enqueue_options: EnqueueOptions,
}

impl ImageService {
    pub fn new(
        repository: Arc<dyn ImageRepository>,
        staging: StagingStore,
        queue: Arc<dyn JobQueue>,
        validator: ImageFileValidator,
        enqueue_options: EnqueueOptions,
    ) -> Self {
        Self {
            repository,
            staging,
            queue,
            validator,
            enqueue_options,
        }
    }

    /// Validate an uploaded file and hand it to [`ImageService::upload`].
    pub async fn upload_image(
        &self,
        file: Option<UploadedFile>,
        options: UploadOptions,
    ) -> Result<ImageRecord, ImageError> {
        let resize = options.resize_request();
        let validated = match self.validator.validate(file.as_ref(), Some(&resize)) {
            Ok(v) => v,
            Err(e) => {
                metrics::counter!("image_uploads_rejected_total").increment(1);
                return Err(e.into());
            }
        };
        // validate() only succeeds when a file is present
        let file = file.ok_or(ImageError::Validation(ValidationError::FileRequired))?;
        self.upload(file, options, validated).await
    }

    pub async fn upload(
        &self,
        file: UploadedFile,
        options: UploadOptions,
        validated: ValidatedImage,
    ) -> Result<ImageRecord, ImageError> {
        let format = validated.metadata.format.unwrap_or(DEFAULT_FORMAT);
        let mimetype = format.mime_type().to_string();
        let (width, height) = resolve_target_dimensions(&options, &validated)?;

        let record = self
            .repository
            .create(NewImage {
                url: String::new(),
                title: options.title.clone(),
                width,
                height,
                status: ImageStatus::Processing,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create image record");
                metrics::counter!("image_upload_failures_total").increment(1);
                ImageError::UploadFailed {
                    image_id: None,
                    source: UploadStageError::Create(e),
                }
            })?;

        let staged_path = match self.staging.stage(record.id, &file.bytes, format).await {
            Ok(path) => path,
            Err(e) => {
                return Err(self
                    .compensate(&record, None, UploadStageError::Stage(e))
                    .await)
            }
        };

        let job = ProcessingJob {
            image_id: record.id,
            local_file_path: staged_path.clone(),
            original_width: validated.metadata.width,
            original_height: validated.metadata.height,
            target_width: options.width.map(round_dimension),
            target_height: options.height.map(round_dimension),
            format,
            mimetype,
        };

        if let Err(e) = self.queue.enqueue(&job, &self.enqueue_options).await {
            return Err(self
                .compensate(&record, Some(staged_path.as_path()), UploadStageError::Enqueue(e))
                .await);
        }

        metrics::counter!("image_uploads_total").increment(1);
        info!(
            image_id = %record.id,
            format = %format,
            width = width,
            height = height,
            "Image accepted for processing"
        );

        Ok(record)
    }

    /// Undo the visible effects of a partial upload, then build the error.
    async fn compensate(
        &self,
        record: &ImageRecord,
        staged_path: Option<&Path>,
        cause: UploadStageError,
    ) -> ImageError {
        error!(image_id = %record.id, error = %cause, "Image upload failed");
        metrics::counter!("image_upload_failures_total").increment(1);

        if let Some(path) = staged_path {
            self.staging.remove(path).await;
        }
        self.mark_failed(record.id).await;

        ImageError::UploadFailed {
            image_id: Some(record.id),
            source: cause,
        }
    }

    async fn mark_failed(&self, image_id: Uuid) {
        match self.repository.update(image_id, ImageUpdate::failed()).await {
            Ok(_) => info!(image_id = %image_id, "Marked image as failed"),
            Err(e) => error!(image_id = %image_id, error = %e, "Failed to mark image as failed"),
        }
    }

    /// Paginated list of active images.
    pub async fn list_images(
        &self,
        filter: ImageFilter,
        page: u32,
        limit: u32,
    ) -> Result<ImagePage, ImageError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let (records, total) = self
            .repository
            .find_many_with_count(&filter, page, limit)
            .await?;

        let total_pages = (total.max(0) as u64).div_ceil(u64::from(limit)) as u32;
        Ok(ImagePage {
            records,
            total,
            page,
            limit,
            total_pages,
        })
    }

    pub async fn get_image(&self, id: Uuid) -> Result<ImageRecord, ImageError> {
        let record = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(ImageError::NotFound(id))?;

        if record.is_deleted() {
            return Err(ImageError::Deleted(id));
        }
        Ok(record)
    }

    /// Soft-delete an image. Stored objects are kept.
    pub async fn delete_image(&self, id: Uuid) -> Result<(), ImageError> {
        self.get_image(id).await?;
        self.repository.soft_delete(id).await?;
        info!(image_id = %id, "Image soft-deleted");
        Ok(())
    }
}

fn round_dimension(value: f64) -> u32 {
    value.round().clamp(0.0, u32::MAX as f64) as u32
}

/// Explicit request dimensions win, otherwise the intrinsic size is used.
fn resolve_target_dimensions(
    options: &UploadOptions,
    validated: &ValidatedImage,
) -> Result<(i32, i32), ImageError> {
    let intrinsic_width = f64::from(validated.metadata.width);
    let intrinsic_height = f64::from(validated.metadata.height);
    let width = options.width.unwrap_or(intrinsic_width).round();
    let height = options.height.unwrap_or(intrinsic_height).round();

    if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
        return Err(ImageError::InvalidDimensions(
            "Invalid image dimensions: width and height must be positive numbers.".to_string(),
        ));
    }
    if width > f64::from(i32::MAX) || height > f64::from(i32::MAX) {
        return Err(ImageError::InvalidDimensions(
            "Invalid image dimensions: width and height are too large.".to_string(),
        ));
    }

    Ok((width as i32, height as i32))
}
