//! Contour tracing, area filtering and ranking.
//!
//! Tracing uses Suzuki-Abe border following via
//! [`imageproc::contours::find_contours`] and keeps outer borders only;
//! hole borders would duplicate every edge ring as a second, slightly
//! smaller contour. Traced chains are compressed by dropping the
//! interior points of straight horizontal, vertical and diagonal runs.

use geo::{Area, LineString, Polygon};
use image::GrayImage;
use imageproc::contours::BorderType;

use crate::edge::EdgeMode;
use crate::native::{HandleError, NativeHandle};
use crate::tracker::ResourceTracker;
use crate::types::{Dimensions, Point, Polyline};

/// Trace the outer border of every non-zero region in `binary`.
#[must_use]
pub fn trace_outer_borders(binary: &GrayImage) -> Vec<Vec<Point>> {
    imageproc::contours::find_contours::<u32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            compress_chain(
                c.points
                    .into_iter()
                    .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                    .collect(),
            )
        })
        .collect()
}

/// Drop points that continue the previous step's direction.
///
/// The chain is treated as closed. Chains shorter than 3 points, or
/// chains that would vanish entirely, are returned unchanged.
#[must_use]
pub fn compress_chain(points: Vec<Point>) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |from: Point, to: Point| (direction(to.x - from.x), direction(to.y - from.y));
    let kept: Vec<Point> = (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| points[i])
        .collect();
    if kept.is_empty() { points } else { kept }
}

/// Sign of a coordinate step. Unlike `f64::signum`, zero maps to 0.
fn direction(delta: f64) -> i8 {
    if delta > 0.0 {
        1
    } else if delta < 0.0 {
        -1
    } else {
        0
    }
}

/// Unsigned area of the closed polygon through `points`.
///
/// Fewer than 3 points enclose nothing.
#[must_use]
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let ring: LineString<f64> = points.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>().into();
    Polygon::new(ring, vec![]).unsigned_area()
}

/// Minimum area a contour must strictly exceed: `fraction` of the image.
#[must_use]
pub fn area_cutoff(dimensions: Dimensions, fraction: f64) -> f64 {
    f64::from(dimensions.width) * f64::from(dimensions.height) * fraction
}

/// Keep the items whose area is strictly greater than `min_area`.
pub fn filter_by_area<T>(items: Vec<T>, min_area: f64, area: impl Fn(&T) -> f64) -> Vec<T> {
    items.into_iter().filter(|item| area(item) > min_area).collect()
}

/// Sort by area descending. Equal areas keep their original order.
pub fn rank_by_area<T>(items: &mut [T], area: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| area(b).total_cmp(&area(a)));
}

/// One detected contour, backed by a tracked native handle.
#[derive(Debug, Clone)]
pub struct Contour {
    handle: NativeHandle,
    area: f64,
    trace_index: usize,
}

impl Contour {
    pub(crate) const fn new(handle: NativeHandle, area: f64, trace_index: usize) -> Self {
        Self {
            handle,
            area,
            trace_index,
        }
    }

    /// Enclosed area in square pixels.
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    /// Position in the tracer's output order.
    #[must_use]
    pub const fn trace_index(&self) -> usize {
        self.trace_index
    }

    #[must_use]
    pub const fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    /// Copy of the contour's points.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Released`] if the contour was released,
    /// for instance by capacity eviction.
    pub fn points(&self) -> Result<Polyline, HandleError> {
        self.handle.with_points(Polyline::clone)
    }
}

/// Ranked result of one pipeline run.
///
/// Owns the winning contour handles and the retained grayscale snapshot.
/// They stay tracked until [`release`](Self::release) is called or the
/// tracker evicts them.
#[derive(Debug)]
pub struct ContourSet {
    primary: Contour,
    secondary: Vec<Contour>,
    retained_gray: NativeHandle,
    dimensions: Dimensions,
    mode: EdgeMode,
}

impl ContourSet {
    pub(crate) const fn new(
        primary: Contour,
        secondary: Vec<Contour>,
        retained_gray: NativeHandle,
        dimensions: Dimensions,
        mode: EdgeMode,
    ) -> Self {
        Self {
            primary,
            secondary,
            retained_gray,
            dimensions,
            mode,
        }
    }

    /// The largest contour.
    #[must_use]
    pub const fn primary(&self) -> &Contour {
        &self.primary
    }

    /// Every other surviving contour, largest first.
    #[must_use]
    pub fn secondary(&self) -> &[Contour] {
        &self.secondary
    }

    /// All contours, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &Contour> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// Number of contours (at least 1).
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.secondary.len()
    }

    /// Grayscale snapshot of the source image.
    #[must_use]
    pub const fn retained_gray(&self) -> &NativeHandle {
        &self.retained_gray
    }

    /// Dimensions of the processed image.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Edge mode that produced this set.
    #[must_use]
    pub const fn mode(&self) -> &EdgeMode {
        &self.mode
    }

    /// Every handle this set owns.
    pub fn handles(&self) -> impl Iterator<Item = &NativeHandle> {
        self.iter()
            .map(Contour::handle)
            .chain(std::iter::once(&self.retained_gray))
    }

    /// Release every owned handle. Returns how many were still live.
    pub fn release(self, tracker: &ResourceTracker) -> usize {
        self.handles()
            .filter(|handle| tracker.release(handle))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_rect(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            image::Luma([if (x0..x1).contains(&x) && (y0..y1).contains(&y) { 255 } else { 0 }])
        })
    }

    #[test]
    fn empty_image_produces_no_contours() {
        assert!(trace_outer_borders(&GrayImage::new(10, 10)).is_empty());
    }

    #[test]
    fn rectangle_compresses_to_corners() {
        let img = filled_rect(20, 20, 5, 5, 15, 15);
        let contours = trace_outer_borders(&img);
        assert_eq!(contours.len(), 1);
        let mut corners: Vec<(i64, i64)> = contours[0]
            .iter()
            .map(|p| (p.x as i64, p.y as i64))
            .collect();
        corners.sort_unstable();
        assert_eq!(corners, vec![(5, 5), (5, 14), (14, 5), (14, 14)]);
        assert!((polygon_area(&contours[0]) - 81.0).abs() < 1e-9);
    }

    #[test]
    fn hollow_ring_yields_only_outer_border() {
        let img = GrayImage::from_fn(20, 20, |x, y| {
            let outer = (3..17).contains(&x) && (3..17).contains(&y);
            let inner = (5..15).contains(&x) && (5..15).contains(&y);
            image::Luma([if outer && !inner { 255 } else { 0 }])
        });
        let contours = trace_outer_borders(&img);
        assert_eq!(contours.len(), 1);
        assert!((polygon_area(&contours[0]) - 169.0).abs() < 1e-9);
    }

    #[test]
    fn region_nested_in_hole_is_traced() {
        let img = GrayImage::from_fn(30, 30, |x, y| {
            let ring = (2..28).contains(&x)
                && (2..28).contains(&y)
                && !((4..26).contains(&x) && (4..26).contains(&y));
            let island = (10..20).contains(&x) && (10..20).contains(&y);
            image::Luma([if ring || island { 255 } else { 0 }])
        });
        assert_eq!(trace_outer_borders(&img).len(), 2);
    }

    #[test]
    fn compress_keeps_short_chains() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)];
        assert_eq!(compress_chain(pts.clone()), pts);
    }

    #[test]
    fn compress_line_keeps_endpoints() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(1.0, 0.0),
        ];
        assert_eq!(
            compress_chain(pts),
            vec![Point::new(0.0, 0.0), Point::new(2.0, 0.0)]
        );
    }

    #[test]
    fn compress_diagonal_run() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 0.0),
        ];
        assert_eq!(
            compress_chain(pts),
            vec![Point::new(0.0, 0.0), Point::new(2.0, 2.0), Point::new(2.0, 0.0)]
        );
    }

    #[test]
    fn compress_keeps_turns_between_axis_and_diagonal_steps() {
        // Down, then diagonal down-right, then right: both turns survive.
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(0.0, 2.0),
            Point::new(1.0, 3.0),
            Point::new(2.0, 3.0),
            Point::new(3.0, 3.0),
        ];
        assert_eq!(
            compress_chain(pts),
            vec![
                Point::new(0.0, 0.0),
                Point::new(0.0, 2.0),
                Point::new(1.0, 3.0),
                Point::new(3.0, 3.0),
            ]
        );
    }

    #[test]
    fn filled_square_area_matches_pixel_centres() {
        for side in [10, 40, 60] {
            let img = filled_rect(side + 20, side + 20, 10, 10, side + 10, side + 10);
            let contours = trace_outer_borders(&img);
            assert_eq!(contours.len(), 1);
            assert_eq!(contours[0].len(), 4, "side {side}");
            let expected = f64::from((side - 1) * (side - 1));
            assert!((polygon_area(&contours[0]) - expected).abs() < 1e-9, "side {side}");
        }
    }

    #[test]
    fn degenerate_polygons_have_zero_area() {
        assert!(polygon_area(&[]).abs() < f64::EPSILON);
        assert!(polygon_area(&[Point::new(1.0, 1.0), Point::new(4.0, 1.0)]).abs() < f64::EPSILON);
    }

    #[test]
    fn area_filter_is_strict() {
        let dims = Dimensions {
            width: 100,
            height: 100,
        };
        let cutoff = area_cutoff(dims, 0.01);
        assert!((cutoff - 100.0).abs() < 1e-9);
        let kept = filter_by_area(vec![100.0, 101.0, 99.0, 5000.0], cutoff, |a| *a);
        assert_eq!(kept, vec![101.0, 5000.0]);
    }

    #[test]
    fn fine_detail_cutoff() {
        let dims = Dimensions {
            width: 500,
            height: 200,
        };
        assert!((area_cutoff(dims, 0.002) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let mut items = vec![(0, 10.0), (1, 30.0), (2, 10.0), (3, 20.0), (4, 30.0)];
        rank_by_area(&mut items, |(_, a)| *a);
        let order: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 4, 3, 0, 2]);
    }
}
