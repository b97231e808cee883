//! Generated image fixtures for pipeline tests

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

/// Named upload sample with its intrinsic size
#[derive(Debug, Clone)]
pub struct ImageFixture {
    pub filename: &'static str,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

pub const LANDSCAPE_JPEG: ImageFixture = ImageFixture {
    filename: "landscape.jpg",
    mime_type: "image/jpeg",
    width: 192,
    height: 108,
    format: ImageFormat::Jpeg,
};

pub const SQUARE_PNG: ImageFixture = ImageFixture {
    filename: "square.png",
    mime_type: "image/png",
    width: 64,
    height: 64,
    format: ImageFormat::Png,
};

pub const BANNER_GIF: ImageFixture = ImageFixture {
    filename: "banner.gif",
    mime_type: "image/gif",
    width: 120,
    height: 40,
    format: ImageFormat::Gif,
};

pub const ICON_WEBP: ImageFixture = ImageFixture {
    filename: "icon.webp",
    mime_type: "image/webp",
    width: 32,
    height: 32,
    format: ImageFormat::WebP,
};

impl ImageFixture {
    /// Encode a gradient of the fixture's size in its format.
    pub fn bytes(&self) -> Vec<u8> {
        encode(self.width, self.height, self.format)
    }
}

pub fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })),
        _ => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 64, 255])
        })),
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("fixture encode");
    out.into_inner()
}

/// A minimal PDF header; recognised by nothing in the image format table.
pub fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< >>\n%%EOF\n".to_vec()
}

/// Valid PNG signature followed by a truncated header.
pub fn truncated_png() -> Vec<u8> {
    let mut bytes = SQUARE_PNG.bytes();
    bytes.truncate(20);
    bytes
}
