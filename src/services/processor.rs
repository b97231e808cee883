use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{ImageRepository, RepositoryError};
use crate::models::format::ImageFormat;
use crate::models::image::{ImageRecord, ImageUpdate};
use crate::models::job::ProcessingJob;
use crate::services::staging::{StagingError, StagingStore};
use crate::services::storage::{ObjectStorage, StorageError};

/// JPEG quality used for every JPEG output.
pub const JPEG_QUALITY: u8 = 90;

/// Key prefix for processed images in object storage.
pub const STORAGE_PREFIX: &str = "images";

/// How a job's format is written back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    Jpeg { quality: u8 },
    Png,
    Webp,
}

impl OutputEncoding {
    /// Pick the encoder for a resolved upload format.
    ///
    /// GIF has no re-encode path and always becomes a single-frame PNG.
    /// Formats without a dedicated encoder fall back to JPEG.
    pub fn for_format(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png | ImageFormat::Gif => OutputEncoding::Png,
            ImageFormat::Webp => OutputEncoding::Webp,
            ImageFormat::Jpeg | ImageFormat::Avif => OutputEncoding::Jpeg {
                quality: JPEG_QUALITY,
            },
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputEncoding::Jpeg { .. } => "jpg",
            OutputEncoding::Png => "png",
            OutputEncoding::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputEncoding::Jpeg { .. } => ImageFormat::Jpeg.mime_type(),
            OutputEncoding::Png => ImageFormat::Png.mime_type(),
            OutputEncoding::Webp => ImageFormat::Webp.mime_type(),
        }
    }
}

/// Encoded output ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: OutputEncoding,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to read staged file: {0}")]
    Read(#[from] StagingError),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Image transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Failed to upload processed image: {0}")]
    Upload(#[from] StorageError),

    #[error("Failed to finalize image record: {0}")]
    Finalize(#[from] RepositoryError),
}

/// Compute the size of a fit-inside resize.
///
/// The result fits within the requested box and keeps the source aspect
/// ratio. Enlargement is allowed. A missing side is unconstrained.
pub fn fit_inside(
    width: u32,
    height: u32,
    target_width: Option<u32>,
    target_height: Option<u32>,
) -> (u32, u32) {
    let scale_w = target_width.map(|w| f64::from(w) / f64::from(width));
    let scale_h = target_height.map(|h| f64::from(h) / f64::from(height));
    let scale = match (scale_w, scale_h) {
        (Some(w), Some(h)) => w.min(h),
        (Some(w), None) => w,
        (None, Some(h)) => h,
        (None, None) => return (width, height),
    };

    let fit = |side: u32, target: Option<u32>| match target {
        // The binding axis lands exactly on the target
        Some(t) if (f64::from(side) * scale - f64::from(t)).abs() < 0.5 => t,
        _ => ((f64::from(side) * scale).round() as u32).max(1),
    };
    (fit(width, target_width), fit(height, target_height))
}

/// Decode, optionally resize, and re-encode staged bytes.
///
/// Only the first frame of an animated image is decoded.
pub fn transform(bytes: &[u8], job: &ProcessingJob) -> Result<EncodedImage, ProcessingError> {
    let mut img = image::load_from_memory(bytes).map_err(ProcessingError::Decode)?;

    if job.has_resize_target() {
        let (width, height) = fit_inside(
            img.width(),
            img.height(),
            job.target_width,
            job.target_height,
        );
        debug!(
            image_id = %job.image_id,
            from_width = img.width(),
            from_height = img.height(),
            to_width = width,
            to_height = height,
            "Resizing image"
        );
        img = img.resize_exact(width, height, FilterType::Lanczos3);
    }

    let encoding = OutputEncoding::for_format(job.format);
    let bytes = encode(&img, encoding)?;

    Ok(EncodedImage {
        bytes,
        width: img.width(),
        height: img.height(),
        encoding,
    })
}

fn encode(img: &DynamicImage, encoding: OutputEncoding) -> Result<Vec<u8>, ProcessingError> {
    let mut out = Vec::new();
    let result = match encoding {
        OutputEncoding::Jpeg { quality } => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        }
        OutputEncoding::Png => img.write_with_encoder(PngEncoder::new(&mut out)),
        OutputEncoding::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))
        }
    };
    result.map_err(ProcessingError::Encode)?;
    Ok(out)
}

/// Consumes processing jobs: transform, upload, finalize the record.
///
/// Every exit path removes the staged file. On failure the record is marked
/// FAILED and the error is returned so the queue can apply its retry policy.
pub struct ImageProcessor {
    repository: Arc<dyn ImageRepository>,
    storage: Arc<dyn ObjectStorage>,
    staging: StagingStore,
}

impl ImageProcessor {
    pub fn new(
        repository: Arc<dyn ImageRepository>,
        storage: Arc<dyn ObjectStorage>,
        staging: StagingStore,
    ) -> Self {
        Self {
            repository,
            storage,
            staging,
        }
    }

    pub async fn handle(&self, job: &ProcessingJob) -> Result<ImageRecord, ProcessingError> {
        info!(
            image_id = %job.image_id,
            path = %job.local_file_path.display(),
            "Processing image"
        );
        let start = Instant::now();

        let result = self.process(job).await;

        match &result {
            Ok(record) => {
                metrics::histogram!("image_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                info!(
                    image_id = %job.image_id,
                    width = record.width,
                    height = record.height,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Image processed successfully"
                );
            }
            Err(e) => {
                error!(image_id = %job.image_id, error = %e, "Failed to process image");
                self.mark_failed(job.image_id).await;
            }
        }

        self.staging.remove(&job.local_file_path).await;
        result
    }

    /// Give up on a job that will not be delivered again: mark the record
    /// FAILED and drop its staged file.
    pub async fn abandon(&self, job: &ProcessingJob) {
        warn!(image_id = %job.image_id, "Abandoning image processing job");
        self.mark_failed(job.image_id).await;
        self.staging.remove(&job.local_file_path).await;
    }

    async fn process(&self, job: &ProcessingJob) -> Result<ImageRecord, ProcessingError> {
        let bytes = self.staging.read(&job.local_file_path).await?;

        let transform_job = job.clone();
        let encoded =
            tokio::task::spawn_blocking(move || transform(&bytes, &transform_job)).await??;

        let key = format!(
            "{}/{}.{}",
            STORAGE_PREFIX,
            job.image_id,
            encoded.encoding.extension()
        );
        debug!(image_id = %job.image_id, key = %key, "Uploading processed image");
        let stored = self
            .storage
            .upload(&encoded.bytes, &key, encoded.encoding.mime_type())
            .await?;

        let update = ImageUpdate::completed(
            stored.url,
            i32::try_from(encoded.width).unwrap_or(i32::MAX),
            i32::try_from(encoded.height).unwrap_or(i32::MAX),
        );
        match self.repository.update(job.image_id, update).await {
            Ok(record) => Ok(record),
            Err(e) => {
                // The record will not point at the object; drop it
                if let Err(delete_err) = self.storage.delete(&stored.key).await {
                    warn!(
                        image_id = %job.image_id,
                        key = %stored.key,
                        error = %delete_err,
                        "Failed to delete orphaned object"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn mark_failed(&self, image_id: Uuid) {
        match self.repository.update(image_id, ImageUpdate::failed()).await {
            Ok(_) => info!(image_id = %image_id, "Marked image as FAILED"),
            Err(e) => error!(image_id = %image_id, error = %e, "Failed to mark image as FAILED"),
        }
    }
}
