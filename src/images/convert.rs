use crate::error::HarvestError;
use image::ImageFormat;
use std::io::Cursor;

/// How downloaded bytes must be re-encoded before they can be embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Re-encoded as PNG.
    WebP,
    /// Multi-picture JPEG, reduced to its primary frame as plain JPEG.
    Mpo,
    Passthrough,
}

/// Decide from the URL and the `Content-Type` header.
pub fn classify(url: &str, content_type: &str) -> Encoding {
    let url = url.to_ascii_lowercase();
    let content_type = content_type.to_ascii_lowercase();
    if url.contains(".webp") || content_type.contains("webp") {
        Encoding::WebP
    } else if url.contains(".mpo") || content_type.contains("mpo") {
        Encoding::Mpo
    } else {
        Encoding::Passthrough
    }
}

pub fn normalize(bytes: Vec<u8>, encoding: Encoding) -> Result<Vec<u8>, HarvestError> {
    let target = match encoding {
        Encoding::Passthrough => return Ok(bytes),
        Encoding::WebP => ImageFormat::Png,
        Encoding::Mpo => ImageFormat::Jpeg,
    };
    let rgb = image::load_from_memory(&bytes)?.to_rgb8();
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut out), target)?;
    Ok(out)
}
