//! Lossless image encoding for captured frames

use base64::{engine::general_purpose, Engine as _};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::error::CaptureError;

/// Encode an RGBA raster as PNG bytes
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(buffer)
}

/// Decode PNG bytes back into an RGBA raster
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, image::ImageError> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8())
}

/// Decode whatever a backend captured (format sniffed) into a software raster
pub fn decode_capture(bytes: &[u8]) -> Result<RgbaImage, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::Decode("empty capture buffer".to_string()));
    }
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| CaptureError::Decode(e.to_string()))
}

/// Base64 encode PNG bytes
pub fn png_to_base64(png: &[u8]) -> String {
    general_purpose::STANDARD.encode(png)
}

/// Encode an image as a `data:image/png;base64,` URI
pub fn to_data_uri(image: &RgbaImage) -> Result<String, image::ImageError> {
    Ok(format!("data:image/png;base64,{}", png_to_base64(&encode_png(image)?)))
}
