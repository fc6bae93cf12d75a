//! Grayscale morphology with arbitrary structuring elements.
//!
//! `imageproc::morphology` only offers norm-ball shapes on binary
//! images, so dilation and erosion are implemented here as plain
//! sliding-window max / min filters. Pixels outside the image are
//! ignored rather than padded, which keeps borders from growing or
//! shrinking artificially.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Footprint shape of a structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelShape {
    /// Every cell of the `width x height` box is set.
    Rect,
    /// Cells inside the ellipse inscribed in the box are set.
    Ellipse,
}

/// Serializable description of a structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Footprint shape.
    pub shape: KernelShape,
    /// Box width in pixels (at least 1).
    pub width: u32,
    /// Box height in pixels (at least 1).
    pub height: u32,
}

impl KernelSpec {
    /// A filled rectangle.
    #[must_use]
    pub const fn rect(width: u32, height: u32) -> Self {
        Self {
            shape: KernelShape::Rect,
            width,
            height,
        }
    }

    /// An inscribed ellipse.
    #[must_use]
    pub const fn ellipse(width: u32, height: u32) -> Self {
        Self {
            shape: KernelShape::Ellipse,
            width,
            height,
        }
    }
}

/// A rasterized structuring element anchored at `(width / 2, height / 2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    width: u32,
    height: u32,
    mask: Vec<bool>,
}

impl StructuringElement {
    /// Rasterize a [`KernelSpec`]. Zero dimensions are bumped to 1.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn new(spec: KernelSpec) -> Self {
        let width = spec.width.max(1);
        let height = spec.height.max(1);
        let mask = match spec.shape {
            KernelShape::Rect => vec![true; (width * height) as usize],
            KernelShape::Ellipse => {
                let r = i64::from(height / 2);
                let c = i64::from(width / 2);
                let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
                let mut mask = vec![false; (width * height) as usize];
                for row in 0..i64::from(height) {
                    let dy = row - r;
                    if dy.abs() > r {
                        continue;
                    }
                    let dx = (c as f64 * ((r * r - dy * dy) as f64 * inv_r2).sqrt()).round() as i64;
                    let start = (c - dx).max(0);
                    let end = (c + dx + 1).min(i64::from(width));
                    for col in start..end {
                        mask[(row * i64::from(width) + col) as usize] = true;
                    }
                }
                mask
            }
        };
        Self {
            width,
            height,
            mask,
        }
    }

    /// Box width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Box height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether the cell at `(col, row)` belongs to the footprint.
    #[must_use]
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col < self.width
            && row < self.height
            && self.mask[(row * self.width + col) as usize]
    }

    /// Offsets of every set cell relative to the anchor.
    pub fn offsets(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let ax = i64::from(self.width / 2);
        let ay = i64::from(self.height / 2);
        (0..self.height).flat_map(move |row| {
            (0..self.width)
                .filter(move |&col| self.contains(col, row))
                .map(move |col| (i64::from(col) - ax, i64::from(row) - ay))
        })
    }
}

/// Grayscale dilation: each output pixel is the maximum under the footprint.
#[must_use = "returns the dilated image"]
pub fn dilate(image: &GrayImage, element: &StructuringElement) -> GrayImage {
    sliding_extreme(image, element, u8::max, u8::MIN)
}

/// Grayscale erosion: each output pixel is the minimum under the footprint.
#[must_use = "returns the eroded image"]
pub fn erode(image: &GrayImage, element: &StructuringElement) -> GrayImage {
    sliding_extreme(image, element, u8::min, u8::MAX)
}

/// Morphological closing (dilate then erode) with the same element.
///
/// Fills gaps narrower than the element without moving edges.
#[must_use = "returns the closed image"]
pub fn close(image: &GrayImage, element: &StructuringElement) -> GrayImage {
    erode(&dilate(image, element), element)
}

fn sliding_extreme(
    image: &GrayImage,
    element: &StructuringElement,
    pick: fn(u8, u8) -> u8,
    identity: u8,
) -> GrayImage {
    let (w, h) = image.dimensions();
    let offsets: Vec<(i64, i64)> = element.offsets().collect();
    GrayImage::from_fn(w, h, |x, y| {
        let value = offsets.iter().fold(identity, |acc, &(dx, dy)| {
            let (Ok(sx), Ok(sy)) = (
                u32::try_from(i64::from(x) + dx),
                u32::try_from(i64::from(y) + dy),
            ) else {
                return acc;
            };
            if sx >= w || sy >= h {
                return acc;
            }
            pick(acc, image.get_pixel(sx, sy).0[0])
        });
        image::Luma([value])
    })
}
