//! Per-pixel filters used by the edge modes.
//!
//! Thresholding, the Laplacian, and the small bits of arithmetic that
//! glue gradient images back into 8-bit edge maps.

use image::{GrayImage, Luma};

use crate::blur::sigma_for_kernel;
use crate::native::GradientImage;

/// Binarize against a Gaussian-weighted local mean.
///
/// Output is 255 where `pixel > local_mean - offset`, 0 elsewhere. The
/// local mean uses a Gaussian window of `block_size x block_size`.
#[must_use = "returns the binary image"]
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let local_mean = if block_size <= 1 {
        image.clone()
    } else {
        imageproc::filter::gaussian_blur_f32(image, sigma_for_kernel(block_size))
    };
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = f32::from(image.get_pixel(x, y).0[0]);
        let mean = f32::from(local_mean.get_pixel(x, y).0[0]);
        Luma([if pixel > mean - offset { 255 } else { 0 }])
    })
}

/// 4-neighbour Laplacian with mirrored borders.
#[must_use]
pub fn laplacian(image: &GrayImage) -> GradientImage {
    let (w, h) = image.dimensions();
    let at = |x: i64, y: i64| -> i16 {
        let x = reflect(x, w);
        let y = reflect(y, h);
        i16::from(image.get_pixel(x, y).0[0])
    };
    GradientImage::from_fn(w, h, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let sum = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4 * at(x, y);
        Luma([sum])
    })
}

/// Mirror an out-of-range coordinate back into `0..len` without
/// repeating the edge pixel (`-1 -> 1`, `len -> len - 2`).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn reflect(i: i64, len: u32) -> u32 {
    let len = i64::from(len);
    if len <= 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= len {
        i = 2 * (len - 1) - i;
    }
    i.clamp(0, len - 1) as u32
}

/// Absolute value of a signed image, saturated into `u8`.
#[must_use]
pub fn abs_saturate(image: &GradientImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0].unsigned_abs();
        Luma([u8::try_from(v).unwrap_or(u8::MAX)])
    })
}

/// `alpha * a + beta * b`, rounded and saturated. Pixels of `b` outside
/// its bounds count as zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn add_weighted(a: &GrayImage, alpha: f32, b: &GrayImage, beta: f32) -> GrayImage {
    let sample = |img: &GrayImage, x: u32, y: u32| {
        img.get_pixel_checked(x, y).map_or(0.0, |p| f32::from(p.0[0]))
    };
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let v = alpha.mul_add(sample(a, x, y), beta * sample(b, x, y));
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Stretch the value range linearly onto `0..=255`.
///
/// A constant image maps to all zeros.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize_min_max(image: &GrayImage) -> GrayImage {
    let (lo, hi) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi <= lo {
        return GrayImage::new(image.width(), image.height());
    }
    let range = f64::from(hi - lo);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = f64::from(image.get_pixel(x, y).0[0] - lo) * 255.0 / range;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Mean pixel intensity, or 0 for an empty image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_intensity(image: &GrayImage) -> f64 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
    sum as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_threshold_uniform_is_all_white() {
        let img = GrayImage::from_pixel(12, 12, Luma([90]));
        let out = adaptive_threshold(&img, 11, 2.0);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn adaptive_threshold_darkens_outside_bright_region() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let out = adaptive_threshold(&img, 5, 2.0);
        // Just left of the step the local mean is raised above the pixel.
        assert_eq!(out.get_pixel(9, 10).0[0], 0);
        // Far from the step the local mean equals the pixel.
        assert_eq!(out.get_pixel(0, 10).0[0], 255);
        assert_eq!(out.get_pixel(19, 10).0[0], 255);
    }

    #[test]
    fn reflect_mirrors_without_repeating_edge() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(-2, 5), 2);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-1, 1), 0);
    }

    #[test]
    fn laplacian_of_single_bright_pixel() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(2, 2, Luma([10]));
        let lap = laplacian(&img);
        assert_eq!(lap.get_pixel(2, 2).0[0], -40);
        assert_eq!(lap.get_pixel(1, 2).0[0], 10);
        assert_eq!(lap.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn laplacian_of_uniform_is_zero() {
        let img = GrayImage::from_pixel(6, 4, Luma([200]));
        assert!(laplacian(&img).pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn abs_saturate_clips() {
        let img = GradientImage::from_fn(3, 1, |x, _| Luma([[-40, 300, i16::MIN][x as usize]]));
        let out = abs_saturate(&img);
        assert_eq!(out.as_raw(), &vec![40, 255, 255]);
    }

    #[test]
    fn add_weighted_half_and_half() {
        let a = GrayImage::from_pixel(2, 2, Luma([100]));
        let b = GrayImage::from_pixel(2, 2, Luma([201]));
        let out = add_weighted(&a, 0.5, &b, 0.5);
        assert!(out.pixels().all(|p| p.0[0] == 151));
    }

    #[test]
    fn normalize_stretches_range() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[10, 60, 110][x as usize]]));
        let out = normalize_min_max(&img);
        assert_eq!(out.as_raw(), &vec![0, 128, 255]);
    }

    #[test]
    fn normalize_constant_is_zero() {
        let img = GrayImage::from_pixel(3, 3, Luma([77]));
        assert!(normalize_min_max(&img).pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn mean_intensity_of_half_white() {
        let img = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        assert!((mean_intensity(&img) - 127.5).abs() < 1e-9);
        assert!(mean_intensity(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }
}
