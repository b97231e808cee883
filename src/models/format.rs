use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Mime type assumed when a client declares none.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Image formats accepted for upload.
///
/// This enum is the format→mime table: every supported format maps to
/// exactly one canonical mime type, and the mapping never changes at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ImageFormat {
    #[serde(alias = "jpg")]
    #[strum(to_string = "jpeg", serialize = "jpg")]
    Jpeg,
    #[strum(to_string = "png")]
    Png,
    #[strum(to_string = "webp")]
    Webp,
    #[strum(to_string = "gif")]
    Gif,
    #[strum(to_string = "avif")]
    Avif,
}

impl ImageFormat {
    /// Canonical mime type for this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Avif => "image/avif",
        }
    }

    /// Whether this build can decode the format. AVIF has no decoder here.
    pub fn is_decodable(self) -> bool {
        !matches!(self, ImageFormat::Avif)
    }

    /// Map a codec format detected by the `image` crate onto a supported format.
    pub fn from_codec(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::WebP => Some(ImageFormat::Webp),
            image::ImageFormat::Gif => Some(ImageFormat::Gif),
            image::ImageFormat::Avif => Some(ImageFormat::Avif),
            _ => None,
        }
    }
}

/// Distinct mime types of every supported format, in table order.
pub fn supported_mime_types() -> Vec<&'static str> {
    let mut mimes: Vec<&'static str> = Vec::new();
    for format in ImageFormat::iter() {
        let mime = format.mime_type();
        if !mimes.contains(&mime) {
            mimes.push(mime);
        }
    }
    mimes
}

/// Mime types of the formats this build can decode; the default upload allow-list.
pub fn decodable_mime_types() -> Vec<&'static str> {
    supported_mime_types()
        .into_iter()
        .filter(|mime| {
            ImageFormat::iter().any(|f| f.mime_type() == *mime && f.is_decodable())
        })
        .collect()
}
