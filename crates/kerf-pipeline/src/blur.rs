//! Gaussian blur parameterized by kernel size.
//!
//! Edge modes specify their smoothing as an odd kernel size (3x3, 5x5).
//! [`imageproc::filter::gaussian_blur_f32`] takes a sigma instead, so the
//! kernel size is mapped to the conventional sigma for that window:
//! `0.3 * ((k - 1) * 0.5 - 1) + 0.8`.

use image::GrayImage;

/// Sigma of a Gaussian whose support matches a `kernel_size` window.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    let k = kernel_size as f32;
    0.3f32.mul_add((k - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Blur `image` with a `kernel_size x kernel_size` Gaussian.
///
/// Kernel sizes 0 and 1 return the image unchanged.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return image.clone();
    }
    imageproc::filter::gaussian_blur_f32(image, sigma_for_kernel(kernel_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn sigma_matches_window_convention() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(5) - 1.1).abs() < 1e-6);
        assert!((sigma_for_kernel(11) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn small_kernels_return_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 0), img);
        assert_eq!(gaussian_blur(&img, 1), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, 5);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = gaussian_blur(&sharp_edge_image(), 5);
        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];
        assert!(left_of_edge > 0, "left of edge stayed at {left_of_edge}");
        assert!(right_of_edge < 255, "right of edge stayed at {right_of_edge}");
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_pixel(10, 10, image::Luma([128]));
        let blurred = gaussian_blur(&img, 5);
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(diff.abs() <= 1, "expected ~128, got {}", pixel.0[0]);
        }
    }
}
