//! Image decoding and grayscale conversion.
//!
//! Encoded bytes (PNG, JPEG, BMP, WebP) decode to an RGBA buffer, the
//! format a drawing surface hands to the pipeline. The pipeline then
//! reduces it to a single luminance channel.

use image::{GrayImage, Luma, RgbaImage};

use crate::types::PipelineError;

/// Decode raw image bytes into an RGBA image.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Convert RGBA to luminance with `0.299*R + 0.587*G + 0.114*B`.
///
/// Alpha is ignored.
#[must_use = "returns the grayscale image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_grayscale(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        let luma = 0.114f32.mul_add(
            f32::from(b),
            0.299f32.mul_add(f32::from(r), 0.587 * f32::from(g)),
        );
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}
