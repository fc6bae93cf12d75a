//! Preview rendering and snapshot sampling.
//!
//! The retained grayscale snapshot of a [`ContourSet`] is rendered as a
//! false-color heatmap with the primary contour stroked green (2 px)
//! and the secondary contours yellow (1 px).

use image::{GrayImage, Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};

use crate::contour::ContourSet;
use crate::native::{HandleError, NativeHandle};
use crate::types::{Dimensions, Polyline};

/// Value returned by snapshot sampling when no data is available.
pub const NEUTRAL_GRAY: u8 = 128;

/// Stroke color of the primary contour.
pub const PRIMARY_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Stroke color of secondary contours.
pub const SECONDARY_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);

/// False-color map for heatmap rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    Jet,
    Hot,
    Cool,
    Gray,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

impl Colormap {
    /// Color for intensity `t` in `[0, 1]` (clamped).
    #[must_use]
    pub fn color(self, t: f64) -> Rgba<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let [r, g, b] = match self {
            Self::Hot => {
                if t < 0.33 {
                    [t / 0.33 * 128.0, 0.0, 0.0]
                } else if t < 0.66 {
                    let s = (t - 0.33) / 0.33;
                    [s.mul_add(127.0, 128.0), s * 128.0, 0.0]
                } else {
                    let s = (t - 0.66) / 0.34;
                    [255.0, s.mul_add(127.0, 128.0), s * 127.0]
                }
            }
            Self::Cool => [255.0 * t, 255.0 * (1.0 - t), 255.0],
            Self::Gray => [255.0 * t; 3],
            Self::Jet => {
                let band = |center: f64| 255.0 * (1.5 - (center - 4.0 * t).abs()).clamp(0.0, 1.0);
                [band(3.0), band(1.5), band(0.5)]
            }
        };
        Rgba([channel(r), channel(g), channel(b), 255])
    }
}

/// Map every pixel of `gray` through `colormap`.
#[must_use]
pub fn heatmap(gray: &GrayImage, colormap: Colormap) -> RgbaImage {
    let lut: Vec<Rgba<u8>> = (0..=255u8)
        .map(|v| colormap.color(f64::from(v) / 255.0))
        .collect();
    RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        lut[usize::from(gray.get_pixel(x, y).0[0])]
    })
}

/// Stroke a closed polyline onto `canvas`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn draw_closed_polyline(canvas: &mut RgbaImage, polyline: &Polyline, color: Rgba<u8>, width: u32) {
    let points = polyline.points();
    if points.is_empty() {
        return;
    }
    let width = width.max(1);
    for (i, start) in points.iter().enumerate() {
        let end = points[(i + 1) % points.len()];
        for dy in 0..width {
            for dx in 0..width {
                let (ox, oy) = (dx as f32, dy as f32);
                draw_line_segment_mut(
                    canvas,
                    (start.x as f32 + ox, start.y as f32 + oy),
                    (end.x as f32 + ox, end.y as f32 + oy),
                    color,
                );
            }
        }
    }
}

/// Heatmap of the retained snapshot with every contour stroked on top.
///
/// # Errors
///
/// Returns [`HandleError`] if any handle of the set was released.
pub fn render_preview(set: &ContourSet, colormap: Colormap) -> Result<RgbaImage, HandleError> {
    let mut canvas = set.retained_gray().with_gray(|g| heatmap(g, colormap))?;
    for contour in set.secondary() {
        draw_closed_polyline(&mut canvas, &contour.points()?, SECONDARY_COLOR, 1);
    }
    draw_closed_polyline(&mut canvas, &set.primary().points()?, PRIMARY_COLOR, 2);
    Ok(canvas)
}

/// Bilinear sample of `gray` at surface coordinates `(x, y)`.
///
/// The surface may have different dimensions than the snapshot; the
/// position is rescaled first. Empty images and empty surfaces yield
/// [`NEUTRAL_GRAY`].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sample_gray_at(gray: &GrayImage, x: f64, y: f64, surface: Dimensions) -> u8 {
    let (gw, gh) = gray.dimensions();
    if gw == 0 || gh == 0 || surface.width == 0 || surface.height == 0 || !x.is_finite() || !y.is_finite() {
        return NEUTRAL_GRAY;
    }
    let max_x = f64::from(gw - 1);
    let max_y = f64::from(gh - 1);
    let fx = (x / f64::from(surface.width) * max_x).clamp(0.0, max_x);
    let fy = (y / f64::from(surface.height) * max_y).clamp(0.0, max_y);

    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(gw - 1);
    let y1 = (y0 + 1).min(gh - 1);
    let sx = fx - f64::from(x0);
    let sy = fy - f64::from(y0);

    let at = |px: u32, py: u32| f64::from(gray.get_pixel(px, py).0[0]);
    let top = at(x0, y0).mul_add(1.0 - sx, at(x1, y0) * sx);
    let bottom = at(x0, y1).mul_add(1.0 - sx, at(x1, y1) * sx);
    channel(top.mul_add(1.0 - sy, bottom * sy))
}

/// [`sample_gray_at`] on a retained snapshot handle, [`NEUTRAL_GRAY`]
/// once it has been released.
#[must_use]
pub fn sample_retained(handle: &NativeHandle, x: f64, y: f64, surface: Dimensions) -> u8 {
    handle
        .with_gray(|g| sample_gray_at(g, x, y, surface))
        .unwrap_or(NEUTRAL_GRAY)
}
