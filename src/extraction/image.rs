//! Image decoding helpers and caption fallbacks.

use image::{DynamicImage, ImageFormat, ImageResult};
use std::io::Cursor;

/// Decode any supported raster format and re-encode it as PNG.
pub(crate) fn normalize_to_png(bytes: &[u8]) -> ImageResult<Vec<u8>> {
    let image = image::load_from_memory(bytes)?;
    encode_png(&image)
}

/// Encode a decoded image as PNG.
pub(crate) fn encode_png(image: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

/// Caption used for a standalone image when OCR finds no text.
pub(crate) fn uploaded_image_caption(filename: &str) -> String {
    format!("Uploaded image ({filename}), no OCR text detected")
}

/// Caption used for an image embedded in a PDF when OCR finds no text.
pub(crate) fn pdf_image_caption(filename: &str, page: u32) -> String {
    format!("Image extracted from {filename} page {page}")
}
