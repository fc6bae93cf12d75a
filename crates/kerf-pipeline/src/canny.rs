//! Canny edge operator on an already blurred image.
//!
//! Structured after `imageproc::edges::canny` (Sobel gradients,
//! non-maximum suppression, hysteresis) with these differences:
//!
//! - No internal blur. Every edge mode blurs explicitly beforehand, so a
//!   second pass would only soften the thresholds the caller chose.
//! - Gradient magnitude is the L1 norm `|gx| + |gy|`, the scale on
//!   which the 50/150 basic thresholds and the mean-based dynamic
//!   thresholds are defined.
//! - Hysteresis visits all 8 neighbours and bounds-checks each one, so
//!   the flood fill can reach the border without underflowing `u32`
//!   coordinates (imageproc#705).

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// Minimum allowed Canny threshold.
///
/// A zero low threshold marks every pixel with any gradient as a
/// candidate edge, flooding contour tracing with noise.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Detect edges with the Canny operator.
///
/// Returns a binary image: 255 for edge pixels, 0 elsewhere. Both
/// thresholds are clamped to at least [`MIN_THRESHOLD`] and `low` is
/// clamped to at most `high`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);

    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);
    let magnitude: Image<Luma<f32>> = Image::from_fn(image.width(), image.height(), |x, y| {
        let h = f32::from(gx.get_pixel(x, y).0[0]);
        let v = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([h.abs() + v.abs()])
    });

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, low, high)
}

/// Keep only pixels that are local maxima across the gradient direction.
fn non_maximum_suppression(
    g: &Image<Luma<f32>>,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Image<Luma<f32>> {
    let (w, h) = g.dimensions();
    let mut out = Image::from_pixel(w, h, Luma([0.0]));
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let x_gradient = f32::from(gx.get_pixel(x, y).0[0]);
            let y_gradient = f32::from(gy.get_pixel(x, y).0[0]);
            let mut angle = y_gradient.atan2(x_gradient).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }

            let (a, b) = if (22.5..67.5).contains(&angle) {
                ((x + 1, y + 1), (x - 1, y - 1))
            } else if (67.5..112.5).contains(&angle) {
                ((x, y - 1), (x, y + 1))
            } else if (112.5..157.5).contains(&angle) {
                ((x - 1, y + 1), (x + 1, y - 1))
            } else {
                ((x - 1, y), (x + 1, y))
            };

            let pixel = g.get_pixel(x, y).0[0];
            if pixel >= g.get_pixel(a.0, a.1).0[0] && pixel >= g.get_pixel(b.0, b.1).0[0] {
                out.put_pixel(x, y, Luma([pixel]));
            }
        }
    }
    out
}

/// Grow strong edges (`>= high`) into connected weak ones (`>= low`).
fn hysteresis(input: &Image<Luma<f32>>, low: f32, high: f32) -> GrayImage {
    let (w, h) = input.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if input.get_pixel(x, y).0[0] < high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma([255]));
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (Some(nx), Some(ny)) =
                        (cx.checked_add_signed(dx), cy.checked_add_signed(dy))
                    else {
                        continue;
                    };
                    if nx >= w || ny >= h {
                        continue;
                    }
                    if input.get_pixel(nx, ny).0[0] >= low && out.get_pixel(nx, ny).0[0] == 0 {
                        out.put_pixel(nx, ny, Luma([255]));
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| if x < 10 { Luma([0]) } else { Luma([255]) })
    }

    fn edge_count(edges: &GrayImage) -> u32 {
        edges.pixels().map(|p| u32::from(p.0[0] > 0)).sum()
    }

    #[test]
    fn border_edge_does_not_panic() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([0]));
        for y in 0..10 {
            img.put_pixel(1, y, Luma([255]));
        }
        let edges = canny(&img, 1.0, 2.0);
        assert!(edge_count(&edges) > 0);
    }

    #[test]
    fn tiny_images_do_not_panic() {
        for (w, h) in [(1, 1), (2, 1), (1, 5), (2, 2)] {
            let img = GrayImage::from_fn(w, h, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
            let edges = canny(&img, 50.0, 150.0);
            assert_eq!(edges.dimensions(), (w, h));
        }
    }

    #[test]
    fn output_dimensions_match_input() {
        let img = GrayImage::new(17, 31);
        let edges = canny(&img, 50.0, 150.0);
        assert_eq!(edges.dimensions(), (17, 31));
    }

    #[test]
    fn uniform_image_has_no_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        assert_eq!(edge_count(&canny(&img, 50.0, 150.0)), 0);
    }

    #[test]
    fn sharp_edge_is_thin_and_vertical() {
        let edges = canny(&sharp_edge_image(), 50.0, 150.0);
        assert!(edge_count(&edges) > 0, "expected edges at sharp boundary");
        for (x, _, p) in edges.enumerate_pixels() {
            if p.0[0] > 0 {
                assert!((8..=11).contains(&x), "edge pixel far from boundary at x={x}");
            }
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn output_is_binary() {
        let img = GrayImage::from_fn(16, 16, |x, y| Luma([((x * 13 + y * 7) % 256) as u8]));
        let edges = canny(&img, 20.0, 60.0);
        assert!(edges.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn zero_low_threshold_is_clamped_to_min() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 0.0, 150.0), canny(&img, MIN_THRESHOLD, 150.0));
    }

    #[test]
    fn low_above_high_is_clamped() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 200.0, 100.0), canny(&img, 100.0, 100.0));
    }
}
