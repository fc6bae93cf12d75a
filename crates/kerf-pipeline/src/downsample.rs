//! Image downsampling to a pixel budget.
//!
//! Images whose pixel count exceeds the budget are shrunk uniformly so
//! that `width * height` fits, preserving the aspect ratio. Smaller
//! images are returned unchanged.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// Default pixel budget (2 megapixels).
pub const DEFAULT_MAX_PIXELS: u64 = 2_000_000;

/// Resampling filter used when downsampling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownsampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl DownsampleFilter {
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Dimensions after fitting `dims` into `max_pixels`.
///
/// Both axes are scaled by `sqrt(max_pixels / area)` and floored, never
/// below 1 pixel. When an axis is pinned at 1 pixel the other one is
/// trimmed so the area still fits.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn fit_dimensions(dims: Dimensions, max_pixels: u64) -> Dimensions {
    let area = dims.area();
    if area <= max_pixels || area == 0 {
        return dims;
    }
    let ratio = (max_pixels as f64 / area as f64).sqrt();
    let scale = |v: u32| ((f64::from(v) * ratio).floor() as u32).max(1);
    let limit = |other: u32| {
        u32::try_from(max_pixels / u64::from(other))
            .unwrap_or(u32::MAX)
            .max(1)
    };
    let height = scale(dims.height);
    let width = scale(dims.width).min(limit(height));
    let height = height.min(limit(width));
    Dimensions { width, height }
}

/// Shrink `image` to fit `max_pixels`.
///
/// Returns the (possibly unchanged) image and whether downsampling
/// was applied.
#[must_use]
pub fn fit_pixel_budget(
    image: RgbaImage,
    max_pixels: u64,
    filter: DownsampleFilter,
) -> (RgbaImage, bool) {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let target = fit_dimensions(dims, max_pixels);
    if target == dims {
        return (image, false);
    }
    tracing::debug!(
        from_width = dims.width,
        from_height = dims.height,
        to_width = target.width,
        to_height = target.height,
        "downsampling image to pixel budget",
    );
    let resized = image::imageops::resize(
        &image,
        target.width,
        target.height,
        filter.to_image_filter(),
    );
    (resized, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([128, 128, 128, 255]))
    }

    #[test]
    fn default_filter_is_triangle() {
        assert_eq!(DownsampleFilter::default(), DownsampleFilter::Triangle);
    }

    #[test]
    fn no_downsample_within_budget() {
        let (result, applied) = fit_pixel_budget(test_image(100, 80), 8_000, DownsampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (100, 80));
    }

    #[test]
    fn downsample_landscape_preserves_aspect() {
        let (result, applied) = fit_pixel_budget(test_image(400, 300), 30_000, DownsampleFilter::Triangle);
        assert!(applied);
        // ratio = sqrt(30000 / 120000) = 0.5
        assert_eq!(result.dimensions(), (200, 150));
    }

    #[test]
    fn downsampled_area_fits_budget() {
        let dims = Dimensions {
            width: 2000,
            height: 1500,
        };
        let fitted = fit_dimensions(dims, DEFAULT_MAX_PIXELS);
        assert!(fitted.area() <= DEFAULT_MAX_PIXELS);
        assert_eq!(fitted.width, 1632);
        assert_eq!(fitted.height, 1224);
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let dims = Dimensions {
            width: 10_000,
            height: 1,
        };
        let fitted = fit_dimensions(dims, 100);
        assert_eq!(fitted.height, 1);
        assert_eq!(fitted.width, 100);
    }
}
