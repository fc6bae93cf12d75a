//! The image-processing capability the pipeline runs on.
//!
//! [`VisionBackend`] is the interchangeable set of primitives the edge
//! modes are written against. Implementations work on plain images and
//! know nothing about handles; the pipeline wraps every result in a
//! tracked [`NativeHandle`](crate::native::NativeHandle).
//!
//! [`ImageprocBackend`] is the default, built on `image`, `imageproc`
//! and `geo`. It also serves as the [`Disposer`] for its own buffers.

use image::{GrayImage, RgbaImage};

use crate::morphology::{KernelSpec, StructuringElement};
use crate::native::{GradientImage, NativeBuffer};
use crate::tracker::{Disposer, ResourceError};
use crate::types::Point;
use crate::{blur, canny, contour, filter, grayscale, morphology};

/// Primitive operations required by the contour pipeline.
pub trait VisionBackend: Send + Sync {
    /// Whether the backend has finished initializing.
    fn is_ready(&self) -> bool {
        true
    }

    /// RGBA to single-channel luminance.
    fn to_grayscale(&self, image: &RgbaImage) -> GrayImage;

    /// Gaussian blur over a `kernel_size` square window. Sizes 0 and 1
    /// leave the image unchanged.
    fn gaussian_blur(&self, image: &GrayImage, kernel_size: u32) -> GrayImage;

    /// Binarize against a Gaussian local mean minus `offset`.
    fn adaptive_threshold(&self, image: &GrayImage, block_size: u32, offset: f32) -> GrayImage;

    /// Rasterize a structuring element.
    fn structuring_element(&self, spec: KernelSpec) -> StructuringElement {
        StructuringElement::new(spec)
    }

    fn dilate(&self, image: &GrayImage, element: &StructuringElement) -> GrayImage;

    fn erode(&self, image: &GrayImage, element: &StructuringElement) -> GrayImage;

    /// Dilate then erode.
    fn close(&self, image: &GrayImage, element: &StructuringElement) -> GrayImage {
        self.erode(&self.dilate(image, element), element)
    }

    /// 3x3 Sobel derivative along x.
    fn sobel_x(&self, image: &GrayImage) -> GradientImage;

    /// 3x3 Sobel derivative along y.
    fn sobel_y(&self, image: &GrayImage) -> GradientImage;

    /// Signed Laplacian.
    fn laplacian(&self, image: &GrayImage) -> GradientImage;

    /// Canny edge operator. Returns a binary 0/255 image.
    fn canny(&self, image: &GrayImage, low: f32, high: f32) -> GrayImage;

    /// Trace the outer borders of non-zero regions. Each contour is
    /// chain-compressed: interior points of straight runs are dropped.
    fn find_contours(&self, binary: &GrayImage) -> Vec<Vec<Point>>;

    /// Unsigned area enclosed by a closed contour.
    fn contour_area(&self, points: &[Point]) -> f64;

    /// Mean pixel intensity.
    fn mean_intensity(&self, image: &GrayImage) -> f64;
}

/// Default backend built on `image` / `imageproc` / `geo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageprocBackend;

impl VisionBackend for ImageprocBackend {
    fn to_grayscale(&self, image: &RgbaImage) -> GrayImage {
        grayscale::to_grayscale(image)
    }

    fn gaussian_blur(&self, image: &GrayImage, kernel_size: u32) -> GrayImage {
        blur::gaussian_blur(image, kernel_size)
    }

    fn adaptive_threshold(&self, image: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
        filter::adaptive_threshold(image, block_size, offset)
    }

    fn dilate(&self, image: &GrayImage, element: &StructuringElement) -> GrayImage {
        morphology::dilate(image, element)
    }

    fn erode(&self, image: &GrayImage, element: &StructuringElement) -> GrayImage {
        morphology::erode(image, element)
    }

    fn sobel_x(&self, image: &GrayImage) -> GradientImage {
        imageproc::gradients::horizontal_sobel(image)
    }

    fn sobel_y(&self, image: &GrayImage) -> GradientImage {
        imageproc::gradients::vertical_sobel(image)
    }

    fn laplacian(&self, image: &GrayImage) -> GradientImage {
        filter::laplacian(image)
    }

    fn canny(&self, image: &GrayImage, low: f32, high: f32) -> GrayImage {
        canny::canny(image, low, high)
    }

    fn find_contours(&self, binary: &GrayImage) -> Vec<Vec<Point>> {
        contour::trace_outer_borders(binary)
    }

    fn contour_area(&self, points: &[Point]) -> f64 {
        contour::polygon_area(points)
    }

    fn mean_intensity(&self, image: &GrayImage) -> f64 {
        filter::mean_intensity(image)
    }
}

impl Disposer for ImageprocBackend {
    fn dispose(&self, _label: &str, buffer: NativeBuffer) -> Result<(), ResourceError> {
        drop(buffer);
        Ok(())
    }
}
