//! Shared types for the kerf contour pipeline.

use serde::{Deserialize, Serialize};

use crate::native::HandleError;

/// Re-export `GrayImage` so downstream crates can reference
/// raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference the
/// source image without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

/// A sequence of connected points forming a closed contour boundary.
///
/// The closing edge from the last point back to the first is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Axis-aligned bounding box as `(min, max)` corners, or `None` when
    /// the polyline is empty.
    #[must_use]
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = *self.0.first()?;
        Some(self.0.iter().fold((first, first), |(lo, hi), p| {
            (
                Point::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        }))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Raw RGBA8 pixel data read from (or written to) a drawing surface.
///
/// Rows are tightly packed, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA bytes, `width * height * 4` long.
    pub pixels: Vec<u8>,
}

impl RawPixelBuffer {
    /// Wrap an already-decoded RGBA image.
    #[must_use]
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        }
    }

    /// Buffer dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Convert into an [`RgbaImage`], checking the size contract.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyImage`] for a zero-sized buffer and
    /// [`ValidationError::BufferSizeMismatch`] when the pixel data does not
    /// hold exactly `width * height * 4` bytes.
    pub fn into_rgba(self) -> Result<RgbaImage, ValidationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.dimensions().area().saturating_mul(4);
        let actual = self.pixels.len() as u64;
        if expected != actual {
            return Err(ValidationError::BufferSizeMismatch { expected, actual });
        }
        RgbaImage::from_raw(self.width, self.height, self.pixels)
            .ok_or(ValidationError::BufferSizeMismatch { expected, actual })
    }
}

/// Pipeline preconditions that were not met.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The image-processing backend has not finished initializing.
    #[error("image processing backend is not ready")]
    BackendNotReady,

    /// No source image has been loaded into the drawing surface.
    #[error("no source image loaded")]
    NoSourceImage,

    /// The source image has a zero dimension.
    #[error("source image is empty ({width}x{height})")]
    EmptyImage {
        /// Reported width.
        width: u32,
        /// Reported height.
        height: u32,
    },

    /// The raw pixel data does not match the declared dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch {
        /// Bytes required by the declared dimensions.
        expected: u64,
        /// Bytes actually present.
        actual: u64,
    },

    /// A configuration value is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur while running the contour pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Preconditions were not met; nothing was allocated.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The pipeline completed but no contour passed the area filter.
    #[error("no contours found in the image")]
    NoContoursFound,

    /// The surviving contours plus the retained snapshot do not fit in
    /// the tracker next to the handles that are already live.
    #[error("result needs {needed} native buffers but only {available} are free")]
    CapacityExceeded { needed: usize, available: usize },

    /// An intermediate buffer was released underneath the run, typically
    /// by capacity eviction.
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// Failed to decode an encoded input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The encoded input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,
}

impl PipelineError {
    /// Short, user-facing name of the failure kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NoContoursFound => "no-contours",
            Self::CapacityExceeded { .. } | Self::Handle(_) => "resource",
            Self::ImageDecode(_) | Self::EmptyInput => "decode",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance_squared() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn polyline_bounds() {
        let pl = Polyline::new(vec![
            Point::new(3.0, 9.0),
            Point::new(-1.0, 2.0),
            Point::new(5.0, 4.0),
        ]);
        let (lo, hi) = pl.bounds().unwrap();
        assert_eq!(lo, Point::new(-1.0, 2.0));
        assert_eq!(hi, Point::new(5.0, 9.0));
        assert!(Polyline::new(vec![]).bounds().is_none());
    }

    #[test]
    fn raw_buffer_round_trips_through_rgba() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        let raw = RawPixelBuffer::from_rgba(img.clone());
        assert_eq!(raw.dimensions(), Dimensions { width: 3, height: 2 });
        assert_eq!(raw.into_rgba().unwrap(), img);
    }

    #[test]
    fn raw_buffer_rejects_short_pixel_data() {
        let raw = RawPixelBuffer {
            width: 2,
            height: 2,
            pixels: vec![0; 15],
        };
        assert_eq!(
            raw.into_rgba(),
            Err(ValidationError::BufferSizeMismatch {
                expected: 16,
                actual: 15,
            })
        );
    }

    #[test]
    fn raw_buffer_rejects_zero_dimension() {
        let raw = RawPixelBuffer {
            width: 0,
            height: 7,
            pixels: vec![],
        };
        assert!(matches!(
            raw.into_rgba(),
            Err(ValidationError::EmptyImage { width: 0, height: 7 })
        ));
    }

    #[test]
    fn error_no_contours_display() {
        let err = PipelineError::NoContoursFound;
        assert_eq!(err.to_string(), "no contours found in the image");
        assert_eq!(err.kind(), "no-contours");
    }

    #[test]
    fn validation_error_is_transparent() {
        let err = PipelineError::from(ValidationError::NoSourceImage);
        assert_eq!(err.to_string(), "no source image loaded");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn dimensions_serde_round_trip() {
        let d = Dimensions {
            width: 640,
            height: 480,
        };
        let json = serde_json::to_string(&d).unwrap();
        let deserialized: Dimensions = serde_json::from_str(&json).unwrap();
        assert_eq!(d, deserialized);
        assert_eq!(d.area(), 307_200);
    }
}
