use image::ImageReader;
use std::io::Cursor;
use tracing::{error, info, warn};

use crate::models::format::{decodable_mime_types, ImageFormat};
use crate::models::upload::{ImageMetadata, ResizeRequest, UploadedFile, ValidatedImage};

/// Limits applied to every upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Maximum declared file size in bytes.
    pub max_file_size: usize,
    /// Maximum width or height in pixels.
    pub max_dimension: u32,
    pub allowed_mime_types: Vec<String>,
}

impl ValidationConfig {
    /// Build a config from megabytes, allowing every format this build can decode.
    pub fn new(max_file_size_mb: usize, max_dimension: u32) -> Self {
        Self {
            max_file_size: max_file_size_mb * 1024 * 1024,
            max_dimension,
            allowed_mime_types: decodable_mime_types()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("File is required")]
    FileRequired,

    #[error("File size exceeds maximum allowed size of {max_mb}MB")]
    FileTooLarge { max_mb: usize },

    #[error("Failed to detect file type")]
    DetectionFailed,

    #[error("Invalid file format. Only images are allowed.")]
    UnsupportedFormat { detected: Option<String> },

    #[error("Invalid image file")]
    InvalidImage,

    #[error("Unable to read image dimensions")]
    MissingDimensions,

    #[error("Image dimensions too large. Maximum allowed: {max}x{max}")]
    DimensionsTooLarge { max: u32 },

    #[error("Invalid width value")]
    InvalidWidth,

    #[error("Invalid height value")]
    InvalidHeight,
}

/// Gatekeeper for uploaded image bytes.
///
/// Checks run in a fixed order and stop at the first failure:
/// presence, declared size, sniffed mime type, header metadata,
/// maximum dimension, then the optional resize request. The size check
/// comes before anything touches the content.
pub struct ImageFileValidator {
    config: ValidationConfig,
}

impl ImageFileValidator {
    pub fn new(config: ValidationConfig) -> Self {
        info!(
            max_file_size_mb = config.max_file_size / 1024 / 1024,
            max_dimension = config.max_dimension,
            "Image validation config loaded"
        );
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(
        &self,
        file: Option<&UploadedFile>,
        resize: Option<&ResizeRequest>,
    ) -> Result<ValidatedImage, ValidationError> {
        let file = file.ok_or(ValidationError::FileRequired)?;

        self.validate_file_size(file.size)?;
        let mime_type = self.detect_mime_type(&file.bytes)?;
        let metadata = self.read_metadata(&file.bytes)?;

        if let Some(resize) = resize {
            validate_resize_request(resize)?;
        }

        Ok(ValidatedImage {
            metadata,
            mime_type,
        })
    }

    fn validate_file_size(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge {
                max_mb: self.config.max_file_size / 1024 / 1024,
            });
        }
        Ok(())
    }

    /// Sniff the mime type from magic bytes and check it against the allow-list.
    fn detect_mime_type(&self, bytes: &[u8]) -> Result<String, ValidationError> {
        let detected = match image::guess_format(bytes) {
            Ok(format) => Some(format.to_mime_type()),
            // Unrecognised magic bytes: not an error of the sniffer itself
            Err(image::ImageError::Unsupported(_)) => None,
            Err(e) => {
                error!(error = %e, "MIME type detection failed");
                return Err(ValidationError::DetectionFailed);
            }
        };

        match detected {
            Some(mime) if self.config.allowed_mime_types.iter().any(|m| m == mime) => {
                Ok(mime.to_string())
            }
            other => {
                warn!(
                    detected = other.unwrap_or("unknown"),
                    "Invalid file type detected"
                );
                Err(ValidationError::UnsupportedFormat {
                    detected: other.map(str::to_string),
                })
            }
        }
    }

    /// Read width, height and format from the image header without a full decode.
    fn read_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, ValidationError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| {
                error!(error = %e, "Failed to read image metadata");
                ValidationError::InvalidImage
            })?;
        let format = reader.format().and_then(ImageFormat::from_codec);
        let (width, height) = reader.into_dimensions().map_err(|e| {
            error!(error = %e, "Failed to read image metadata");
            ValidationError::InvalidImage
        })?;

        if width == 0 || height == 0 {
            return Err(ValidationError::MissingDimensions);
        }

        if width > self.config.max_dimension || height > self.config.max_dimension {
            return Err(ValidationError::DimensionsTooLarge {
                max: self.config.max_dimension,
            });
        }

        Ok(ImageMetadata {
            width,
            height,
            format,
            size: bytes.len(),
        })
    }
}

/// Each provided dimension must be a positive whole number.
fn validate_resize_request(resize: &ResizeRequest) -> Result<(), ValidationError> {
    if resize.is_empty() {
        return Ok(());
    }
    if resize.width.is_some_and(|w| !is_positive_integer(w)) {
        return Err(ValidationError::InvalidWidth);
    }
    if resize.height.is_some_and(|h| !is_positive_integer(h)) {
        return Err(ValidationError::InvalidHeight);
    }
    Ok(())
}

fn is_positive_integer(value: f64) -> bool {
    value.is_finite() && value >= 1.0 && value.fract() == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn validator() -> ImageFileValidator {
        ImageFileValidator::new(ValidationConfig::new(10, 4096))
    }

    fn file(bytes: Vec<u8>) -> UploadedFile {
        UploadedFile::new(bytes, "upload.bin", "image/png")
    }

    #[test]
    fn test_accepts_png_and_reads_metadata() {
        let upload = file(encode(64, 32, image::ImageFormat::Png));
        let validated = validator().validate(Some(&upload), None).unwrap();
        assert_eq!(validated.mime_type, "image/png");
        assert_eq!(validated.metadata.width, 64);
        assert_eq!(validated.metadata.height, 32);
        assert_eq!(validated.metadata.format, Some(ImageFormat::Png));
    }

    #[test]
    fn test_missing_file() {
        assert_eq!(
            validator().validate(None, None).unwrap_err(),
            ValidationError::FileRequired
        );
    }

    #[test]
    fn test_size_checked_before_content() {
        // Garbage bytes would fail mime detection; size must be reported first
        let mut upload = file(b"definitely not an image".to_vec());
        upload.size = 11 * 1024 * 1024;
        let err = validator().validate(Some(&upload), None).unwrap_err();
        assert_eq!(err, ValidationError::FileTooLarge { max_mb: 10 });
        assert_eq!(err.to_string(), "File size exceeds maximum allowed size of 10MB");
    }

    #[test]
    fn test_pdf_rejected_as_invalid_format() {
        let upload = file(b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec());
        let err = validator().validate(Some(&upload), None).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { .. }));
        assert_eq!(err.to_string(), "Invalid file format. Only images are allowed.");
    }

    #[test]
    fn test_declared_mime_is_ignored() {
        let mut upload = file(b"plain text pretending".to_vec());
        upload.declared_mime_type = "image/jpeg".to_string();
        let err = validator().validate(Some(&upload), None).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { detected: None }));
    }

    #[test]
    fn test_mime_outside_allow_list() {
        let config = ValidationConfig {
            allowed_mime_types: vec!["image/jpeg".to_string()],
            ..ValidationConfig::new(10, 4096)
        };
        let upload = file(encode(8, 8, image::ImageFormat::Png));
        let err = ImageFileValidator::new(config)
            .validate(Some(&upload), None)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedFormat {
                detected: Some("image/png".to_string())
            }
        );
    }

    #[test]
    fn test_truncated_image_is_invalid_not_unsupported() {
        let mut bytes = encode(16, 16, image::ImageFormat::Png);
        bytes.truncate(12); // keeps the PNG signature, drops IHDR
        let err = validator().validate(Some(&file(bytes)), None).unwrap_err();
        assert_eq!(err, ValidationError::InvalidImage);
        assert_eq!(err.to_string(), "Invalid image file");
    }

    #[test]
    fn test_dimension_limit() {
        let config = ValidationConfig::new(10, 32);
        let upload = file(encode(33, 8, image::ImageFormat::Png));
        let err = ImageFileValidator::new(config)
            .validate(Some(&upload), None)
            .unwrap_err();
        assert_eq!(err, ValidationError::DimensionsTooLarge { max: 32 });
        assert_eq!(
            err.to_string(),
            "Image dimensions too large. Maximum allowed: 32x32"
        );
    }

    #[test]
    fn test_resize_request_rules() {
        let upload = file(encode(8, 8, image::ImageFormat::Jpeg));
        let v = validator();

        let empty = ResizeRequest::default();
        assert!(v.validate(Some(&upload), Some(&empty)).is_ok());

        let only_width = ResizeRequest {
            width: Some(800.0),
            height: None,
        };
        assert!(v.validate(Some(&upload), Some(&only_width)).is_ok());

        let zero = ResizeRequest {
            width: Some(0.0),
            height: Some(600.0),
        };
        assert_eq!(
            v.validate(Some(&upload), Some(&zero)).unwrap_err(),
            ValidationError::InvalidWidth
        );

        let negative = ResizeRequest {
            width: None,
            height: Some(-4.0),
        };
        assert_eq!(
            v.validate(Some(&upload), Some(&negative)).unwrap_err(),
            ValidationError::InvalidHeight
        );

        let nan = ResizeRequest {
            width: Some(f64::NAN),
            height: None,
        };
        assert_eq!(
            v.validate(Some(&upload), Some(&nan)).unwrap_err(),
            ValidationError::InvalidWidth
        );

        let fractional = ResizeRequest {
            width: Some(800.0),
            height: Some(600.5),
        };
        assert_eq!(
            v.validate(Some(&upload), Some(&fractional)).unwrap_err(),
            ValidationError::InvalidHeight
        );
    }

    #[test]
    fn test_avif_rejected_as_invalid_format() {
        // ISO-BMFF box header with the AVIF brand; no decoder is built in
        let mut bytes = b"\x00\x00\x00\x1cftypavif\x00\x00\x00\x00avifmif1miaf".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Avif);

        let err = validator().validate(Some(&file(bytes)), None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedFormat {
                detected: Some("image/avif".to_string())
            }
        );
        assert_eq!(err.to_string(), "Invalid file format. Only images are allowed.");
    }
}
