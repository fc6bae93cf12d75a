//! Edge-emphasis modes.
//!
//! Each [`EdgeMode`] turns a grayscale image into an 8-bit edge map
//! suitable for contour tracing. Modes run on tracked handles: every
//! intermediate they create is registered with the run's scratch set
//! and released as soon as the next step no longer needs it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::VisionBackend;
use crate::filter;
use crate::morphology::KernelSpec;
use crate::native::{NativeBuffer, NativeHandle};
use crate::pipeline::Scratch;
use crate::types::{PipelineError, ValidationError};

/// Constant subtracted from the local mean in adaptive thresholding.
pub const ADAPTIVE_OFFSET: f32 = 2.0;

/// Default detail level of the adaptive-threshold mode.
pub const DEFAULT_DETAIL: f32 = 5.0;

/// Default sensitivity of dynamic Canny thresholds.
pub const DEFAULT_SENSITIVITY: f32 = 0.33;

/// How Canny thresholds are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CannyThresholds {
    /// Constant thresholds.
    Fixed {
        /// Weak-edge threshold.
        low: f32,
        /// Strong-edge threshold.
        high: f32,
    },
    /// Thresholds bracketing the mean intensity of the blurred input.
    Dynamic {
        /// Half-width of the bracket as a share of the mean, in `[0, 1]`.
        sensitivity: f32,
    },
}

impl CannyThresholds {
    /// The fixed 50 / 150 pair of the basic mode.
    pub const BASIC: Self = Self::Fixed {
        low: 50.0,
        high: 150.0,
    };

    /// Resolve to a concrete `(low, high)` pair for an input whose mean
    /// intensity is `mean`.
    #[must_use]
    pub fn resolve(self, mean: f64) -> (f32, f32) {
        match self {
            Self::Fixed { low, high } => (low, high),
            Self::Dynamic { sensitivity } => dynamic_thresholds(mean, sensitivity),
        }
    }
}

impl Default for CannyThresholds {
    fn default() -> Self {
        Self::Dynamic {
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

/// `low = max(0, (1 - s) * mean)`, `high = min(255, (1 + s) * mean)`
/// with `s` clamped to `[0, 1]`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn dynamic_thresholds(mean: f64, sensitivity: f32) -> (f32, f32) {
    let s = f64::from(sensitivity.clamp(0.0, 1.0));
    let low = ((1.0 - s) * mean).max(0.0);
    let high = ((1.0 + s) * mean).min(255.0);
    (low as f32, high as f32)
}

/// Adaptive-threshold block size for a detail level: `2 * floor(detail) + 1`,
/// at least 3.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn block_size(detail: f32) -> u32 {
    if !detail.is_finite() || detail < 1.0 {
        return 3;
    }
    let d = detail.floor().min(f32::from(u16::MAX)) as u32;
    (2 * d + 1).max(3)
}

/// Edge-emphasis transform applied between blur and closing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EdgeMode {
    /// Binarize against a Gaussian local mean, then close with a 3x3
    /// ellipse.
    AdaptiveThreshold {
        /// Detail level; larger values widen the local window.
        detail: f32,
    },
    /// Light blur, then `dilate - erode` with a 3x3 ellipse, stretched
    /// to the full intensity range.
    MorphologicalGradient,
    /// Blur, |Sobel x| and |Sobel y| averaged, then closed with a 2x2
    /// ellipse.
    Gradient,
    /// Light blur, then the Canny operator.
    Canny {
        /// Threshold selection.
        thresholds: CannyThresholds,
    },
    /// |Sobel x| and |Sobel y| averaged, no extra smoothing.
    Sobel,
    /// Absolute Laplacian.
    Laplacian,
}

impl Default for EdgeMode {
    fn default() -> Self {
        Self::Canny {
            thresholds: CannyThresholds::default(),
        }
    }
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl EdgeMode {
    /// Short identifier, as used on the command line.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AdaptiveThreshold { .. } => "adaptive",
            Self::MorphologicalGradient => "morphological",
            Self::Gradient => "gradient",
            Self::Canny {
                thresholds: CannyThresholds::Fixed { .. },
            } => "canny-basic",
            Self::Canny { .. } => "canny",
            Self::Sobel => "sobel",
            Self::Laplacian => "laplacian",
        }
    }

    /// Blur window the mode applies before its transform. Skipped when
    /// the pipeline's pre-blur already used a window at least as large.
    #[must_use]
    pub const fn blur_kernel(&self) -> u32 {
        match self {
            Self::MorphologicalGradient | Self::Canny { .. } => 3,
            Self::Gradient => 5,
            Self::AdaptiveThreshold { .. } | Self::Sobel | Self::Laplacian => 0,
        }
    }

    /// Check numeric parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for non-finite values
    /// or negative fixed thresholds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Self::AdaptiveThreshold { detail } if !detail.is_finite() => Err(
                ValidationError::InvalidConfig(format!("detail must be finite, got {detail}")),
            ),
            Self::Canny {
                thresholds: CannyThresholds::Fixed { low, high },
            } if !(low.is_finite() && high.is_finite() && low >= 0.0 && high >= 0.0) => {
                Err(ValidationError::InvalidConfig(format!(
                    "canny thresholds must be finite and non-negative, got {low}/{high}"
                )))
            }
            Self::Canny {
                thresholds: CannyThresholds::Dynamic { sensitivity },
            } if !sensitivity.is_finite() => Err(ValidationError::InvalidConfig(format!(
                "sensitivity must be finite, got {sensitivity}"
            ))),
            _ => Ok(()),
        }
    }

    /// Run the transform on `input`, returning a tracked edge map.
    ///
    /// `pre_blur` is the window the pipeline already blurred with.
    /// `input` is borrowed, never released here.
    pub(crate) fn apply(
        &self,
        backend: &dyn VisionBackend,
        scratch: &mut Scratch<'_>,
        input: &NativeHandle,
        pre_blur: u32,
    ) -> Result<NativeHandle, PipelineError> {
        let blurred = if self.blur_kernel() > pre_blur {
            let k = self.blur_kernel();
            let img = input.with_gray(|g| backend.gaussian_blur(g, k))?;
            Some(scratch.alloc(format!("{self} blur"), NativeBuffer::Gray(img)))
        } else {
            None
        };
        let source = blurred.as_ref().unwrap_or(input);
        tracing::debug!(mode = %self, blurred = blurred.is_some(), "applying edge mode");

        let edges = match *self {
            Self::AdaptiveThreshold { detail } => {
                let block = block_size(detail);
                let img = source.with_gray(|g| backend.adaptive_threshold(g, block, ADAPTIVE_OFFSET))?;
                let thresholded = scratch.alloc("adaptive threshold", NativeBuffer::Gray(img));
                let closed = close(backend, scratch, &thresholded, KernelSpec::ellipse(3, 3))?;
                scratch.release(&thresholded);
                closed
            }
            Self::MorphologicalGradient => {
                let kernel = scratch.alloc(
                    "ellipse 3x3",
                    NativeBuffer::Kernel(backend.structuring_element(KernelSpec::ellipse(3, 3))),
                );
                let dilated = source.with_gray(|g| kernel.with_kernel(|k| backend.dilate(g, k)))??;
                let dilated = scratch.alloc("dilated", NativeBuffer::Gray(dilated));
                let eroded = source.with_gray(|g| kernel.with_kernel(|k| backend.erode(g, k)))??;
                let eroded = scratch.alloc("eroded", NativeBuffer::Gray(eroded));
                scratch.release(&kernel);
                let diff = dilated.with_gray(|d| {
                    eroded.with_gray(|e| {
                        image::GrayImage::from_fn(d.width(), d.height(), |x, y| {
                            image::Luma([d.get_pixel(x, y).0[0].saturating_sub(e.get_pixel(x, y).0[0])])
                        })
                    })
                })??;
                scratch.release(&dilated);
                scratch.release(&eroded);
                scratch.alloc(
                    "morphological gradient",
                    NativeBuffer::Gray(filter::normalize_min_max(&diff)),
                )
            }
            Self::Gradient => {
                let combined = sobel_magnitude(backend, scratch, source)?;
                let closed = close(backend, scratch, &combined, KernelSpec::ellipse(2, 2))?;
                scratch.release(&combined);
                closed
            }
            Self::Canny { thresholds } => {
                let mean = source.with_gray(|g| backend.mean_intensity(g))?;
                let (low, high) = thresholds.resolve(mean);
                tracing::debug!(mean, low, high, "canny thresholds");
                let img = source.with_gray(|g| backend.canny(g, low, high))?;
                scratch.alloc("canny", NativeBuffer::Gray(img))
            }
            Self::Sobel => sobel_magnitude(backend, scratch, source)?,
            Self::Laplacian => {
                let lap = source.with_gray(|g| backend.laplacian(g))?;
                let lap = scratch.alloc("laplacian", NativeBuffer::Gradient(lap));
                let abs = lap.with_gradient(filter::abs_saturate)?;
                scratch.release(&lap);
                scratch.alloc("abs laplacian", NativeBuffer::Gray(abs))
            }
        };

        if let Some(blurred) = blurred {
            scratch.release(&blurred);
        }
        Ok(edges)
    }
}

/// `0.5 * |gx| + 0.5 * |gy|`.
fn sobel_magnitude(
    backend: &dyn VisionBackend,
    scratch: &mut Scratch<'_>,
    source: &NativeHandle,
) -> Result<NativeHandle, PipelineError> {
    let gx = scratch.alloc("sobel x", NativeBuffer::Gradient(source.with_gray(|g| backend.sobel_x(g))?));
    let abs_x = scratch.alloc("abs sobel x", NativeBuffer::Gray(gx.with_gradient(filter::abs_saturate)?));
    scratch.release(&gx);
    let gy = scratch.alloc("sobel y", NativeBuffer::Gradient(source.with_gray(|g| backend.sobel_y(g))?));
    let abs_y = scratch.alloc("abs sobel y", NativeBuffer::Gray(gy.with_gradient(filter::abs_saturate)?));
    scratch.release(&gy);
    let combined = abs_x.with_gray(|a| abs_y.with_gray(|b| filter::add_weighted(a, 0.5, b, 0.5)))??;
    scratch.release(&abs_x);
    scratch.release(&abs_y);
    Ok(scratch.alloc("sobel magnitude", NativeBuffer::Gray(combined)))
}

/// Morphological closing of `input` with a freshly allocated element.
pub(crate) fn close(
    backend: &dyn VisionBackend,
    scratch: &mut Scratch<'_>,
    input: &NativeHandle,
    spec: KernelSpec,
) -> Result<NativeHandle, PipelineError> {
    let kernel = scratch.alloc(
        format!("{:?} {}x{}", spec.shape, spec.width, spec.height).to_lowercase(),
        NativeBuffer::Kernel(backend.structuring_element(spec)),
    );
    let closed = input.with_gray(|g| kernel.with_kernel(|k| backend.close(g, k)))??;
    scratch.release(&kernel);
    Ok(scratch.alloc("closed", NativeBuffer::Gray(closed)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::ImageprocBackend;
    use crate::tracker::ResourceTracker;
    use image::GrayImage;

    #[test]
    fn block_size_formula() {
        assert_eq!(block_size(5.0), 11);
        assert_eq!(block_size(5.9), 11);
        assert_eq!(block_size(1.0), 3);
        assert_eq!(block_size(0.0), 3);
        assert_eq!(block_size(-4.0), 3);
        assert_eq!(block_size(2.0), 5);
        assert_eq!(block_size(f32::NAN), 3);
    }

    #[test]
    fn dynamic_thresholds_formula() {
        let (low, high) = dynamic_thresholds(100.0, 0.33);
        assert!((low - 67.0).abs() < 1e-4);
        assert!((high - 133.0).abs() < 1e-4);
    }

    #[test]
    fn dynamic_thresholds_clamp() {
        let (low, high) = dynamic_thresholds(200.0, 0.5);
        assert!((low - 100.0).abs() < 1e-4);
        assert!((high - 255.0).abs() < 1e-4);
        // Sensitivity above 1 is clamped, so low bottoms out at 0.
        let (low, high) = dynamic_thresholds(100.0, 3.0);
        assert!(low.abs() < 1e-6);
        assert!((high - 200.0).abs() < 1e-4);
    }

    #[test]
    fn basic_thresholds_are_fixed() {
        assert_eq!(CannyThresholds::BASIC.resolve(12.0), (50.0, 150.0));
    }

    #[test]
    fn mode_names() {
        assert_eq!(EdgeMode::default().name(), "canny");
        assert_eq!(
            EdgeMode::Canny {
                thresholds: CannyThresholds::BASIC
            }
            .to_string(),
            "canny-basic"
        );
        assert_eq!(EdgeMode::AdaptiveThreshold { detail: 5.0 }.name(), "adaptive");
    }

    #[test]
    fn validate_rejects_nan() {
        assert!(EdgeMode::AdaptiveThreshold { detail: f32::NAN }.validate().is_err());
        assert!(
            EdgeMode::Canny {
                thresholds: CannyThresholds::Fixed {
                    low: -1.0,
                    high: 10.0
                }
            }
            .validate()
            .is_err()
        );
        assert!(EdgeMode::Sobel.validate().is_ok());
    }

    #[test]
    fn mode_serde_round_trip() {
        let mode = EdgeMode::Canny {
            thresholds: CannyThresholds::Dynamic { sensitivity: 0.4 },
        };
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(
            json,
            r#"{"mode":"canny","thresholds":{"kind":"dynamic","sensitivity":0.4}}"#
        );
        let back: EdgeMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mode);
    }

    fn square_image() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            image::Luma([if (10..30).contains(&x) && (10..30).contains(&y) { 255 } else { 0 }])
        })
    }

    /// Every mode yields a same-sized binary-ish edge map and leaves
    /// only its output handle tracked.
    #[test]
    fn every_mode_releases_its_intermediates() {
        let modes = [
            EdgeMode::AdaptiveThreshold { detail: 5.0 },
            EdgeMode::MorphologicalGradient,
            EdgeMode::Gradient,
            EdgeMode::Canny {
                thresholds: CannyThresholds::BASIC,
            },
            EdgeMode::default(),
            EdgeMode::Sobel,
            EdgeMode::Laplacian,
        ];
        for mode in modes {
            let tracker = ResourceTracker::default();
            let input = NativeHandle::new("input", NativeBuffer::Gray(square_image()));
            let mut scratch = Scratch::new(&tracker);
            let edges = mode.apply(&ImageprocBackend, &mut scratch, &input, 0).unwrap();
            assert_eq!(tracker.usage().current, 1, "{mode} leaked intermediates");
            assert!(tracker.contains(&edges));
            let dims = edges.with_gray(GrayImage::dimensions).unwrap();
            assert_eq!(dims, (40, 40), "{mode} changed dimensions");
            let lit = edges.with_gray(|g| g.pixels().filter(|p| p.0[0] > 0).count()).unwrap();
            assert!(lit > 0, "{mode} produced an empty edge map");
            drop(scratch);
            assert_eq!(tracker.usage().current, 0);
            assert!(!input.is_released(), "{mode} released its input");
        }
    }

    #[test]
    fn mode_blur_skipped_when_pre_blurred() {
        let tracker = ResourceTracker::default();
        let input = NativeHandle::new("input", NativeBuffer::Gray(square_image()));
        let mut scratch = Scratch::new(&tracker);
        EdgeMode::Gradient
            .apply(&ImageprocBackend, &mut scratch, &input, 5)
            .unwrap();
        // No "gradient blur" handle was ever allocated.
        assert_eq!(tracker.usage().total_allocated, 7);
    }
}
