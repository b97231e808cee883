use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::format::ImageFormat;
use super::image::{ImagePage, ImageRecord, ImageStatus};

/// Raw file received from a client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub original_name: String,
    /// Content type declared by the client. Never trusted for validation.
    pub declared_mime_type: String,
    pub size: usize,
}

impl UploadedFile {
    pub fn new(
        bytes: Vec<u8>,
        original_name: impl Into<String>,
        declared_mime_type: impl Into<String>,
    ) -> Self {
        let size = bytes.len();
        Self {
            bytes,
            original_name: original_name.into(),
            declared_mime_type: declared_mime_type.into(),
            size,
        }
    }
}

/// Resize dimensions exactly as the client sent them, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResizeRequest {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl ResizeRequest {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Upload options (metadata portion of the multipart form).
///
/// Width and height are kept as sent; finiteness and positivity are checked
/// by the file validator so they are reported in the same order as the other
/// upload checks.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UploadOptions {
    #[garde(length(max = 255))]
    pub title: Option<String>,

    #[garde(range(max = 10000.0))]
    pub width: Option<f64>,

    #[garde(range(max = 10000.0))]
    pub height: Option<f64>,
}

impl UploadOptions {
    pub fn resize_request(&self) -> ResizeRequest {
        ResizeRequest {
            width: self.width,
            height: self.height,
        }
    }
}

/// Intrinsic properties read from the uploaded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// `None` when the codec is recognised but outside the format table.
    pub format: Option<ImageFormat>,
    pub size: usize,
}

/// Successful validation result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImage {
    pub metadata: ImageMetadata,
    pub mime_type: String,
}

/// Query parameters for listing images.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListImagesQuery {
    #[garde(length(min = 1, max = 255))]
    pub title: Option<String>,

    #[garde(range(min = 1))]
    #[serde(default = "default_page")]
    pub page: u32,

    #[garde(range(min = 1, max = 100))]
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// Image representation returned to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: Uuid,
    /// Empty while the image is processing.
    pub url: String,
    pub title: Option<String>,
    pub width: i32,
    pub height: i32,
    pub status: ImageStatus,
}

impl From<ImageRecord> for ImageResponse {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            title: record.title,
            width: record.width,
            height: record.height,
            status: record.status,
        }
    }
}

/// Paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl From<ImagePage> for PaginatedResponse<ImageResponse> {
    fn from(page: ImagePage) -> Self {
        Self {
            data: page.records.into_iter().map(ImageResponse::from).collect(),
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
        }
    }
}
