//! The contour pipeline.
//!
//! `RGBA source -> grayscale -> pre-blur -> edge mode -> closing ->
//! tracing -> area filter -> ranking`.
//!
//! Every buffer is wrapped in a [`NativeHandle`] and tracked the moment
//! it exists. Transient handles live in a [`Scratch`] set whose `Drop`
//! releases whatever is left, so early returns and unwinding clean up
//! just like the success path. The winning contours and a grayscale
//! snapshot are detached from the scratch set and handed to the caller
//! inside the [`ContourSet`].

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::backend::VisionBackend;
use crate::contour::{self, Contour, ContourSet};
use crate::edge::{self, CannyThresholds, DEFAULT_DETAIL, DEFAULT_SENSITIVITY, EdgeMode};
use crate::morphology::KernelSpec;
use crate::native::{HandleError, NativeBuffer, NativeHandle};
use crate::tracker::ResourceTracker;
use crate::types::{Dimensions, PipelineError, Polyline, RawPixelBuffer, ValidationError};

/// Contour size policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Keep contours larger than 1% of the image.
    #[default]
    General,
    /// Keep contours larger than 0.2% of the image, so small,
    /// low-contrast subjects survive.
    FineDetail,
}

impl Profile {
    /// Share of the image area a contour must strictly exceed.
    #[must_use]
    pub const fn min_area_fraction(self) -> f64 {
        match self {
            Self::General => 0.01,
            Self::FineDetail => 0.002,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Edge-emphasis transform.
    pub mode: EdgeMode,
    /// Contour size policy.
    pub profile: Profile,
    /// Gaussian pre-blur window (0 or odd; 0 and 1 disable it).
    pub blur_kernel: u32,
    /// Closing applied to every mode's output, if any.
    pub close_kernel: Option<KernelSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::general()
    }
}

impl PipelineConfig {
    /// General-purpose preset: 5x5 pre-blur, dynamic Canny at sensitivity
    /// 0.33, 3x3 rectangular closing, 1% area cutoff.
    #[must_use]
    pub const fn general() -> Self {
        Self {
            mode: EdgeMode::Canny {
                thresholds: CannyThresholds::Dynamic {
                    sensitivity: DEFAULT_SENSITIVITY,
                },
            },
            profile: Profile::General,
            blur_kernel: 5,
            close_kernel: Some(KernelSpec::rect(3, 3)),
        }
    }

    /// Fine-detail preset: adaptive threshold at detail 5, no pre-blur,
    /// no extra closing, 0.2% area cutoff.
    #[must_use]
    pub const fn fine_detail() -> Self {
        Self {
            mode: EdgeMode::AdaptiveThreshold {
                detail: DEFAULT_DETAIL,
            },
            profile: Profile::FineDetail,
            blur_kernel: 0,
            close_kernel: None,
        }
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for an even pre-blur
    /// window, an empty closing kernel, or invalid mode parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.blur_kernel > 1 && self.blur_kernel % 2 == 0 {
            return Err(ValidationError::InvalidConfig(format!(
                "blur kernel must be 0 or odd, got {}",
                self.blur_kernel
            )));
        }
        if let Some(spec) = self.close_kernel
            && (spec.width == 0 || spec.height == 0)
        {
            return Err(ValidationError::InvalidConfig(format!(
                "closing kernel must be non-empty, got {}x{}",
                spec.width, spec.height
            )));
        }
        self.mode.validate()
    }
}

/// Transient handles of one pipeline run.
///
/// Handles allocated here are tracked immediately. Whatever is still
/// owned when the set is dropped gets released.
pub(crate) struct Scratch<'a> {
    tracker: &'a ResourceTracker,
    owned: Vec<NativeHandle>,
}

impl<'a> Scratch<'a> {
    pub(crate) const fn new(tracker: &'a ResourceTracker) -> Self {
        Self {
            tracker,
            owned: Vec::new(),
        }
    }

    /// Wrap and track a new buffer.
    pub(crate) fn alloc(&mut self, label: impl Into<String>, buffer: NativeBuffer) -> NativeHandle {
        let handle = NativeHandle::new(label, buffer);
        self.tracker.track(&handle);
        self.owned.push(handle.clone());
        handle
    }

    /// Release a handle now rather than at drop.
    pub(crate) fn release(&mut self, handle: &NativeHandle) {
        self.forget(handle);
        self.tracker.release(handle);
    }

    /// Number of handles still owned.
    pub(crate) fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// Detach a handle: it stays tracked and is no longer released at drop.
    pub(crate) fn keep(&mut self, handle: &NativeHandle) {
        self.forget(handle);
    }

    fn forget(&mut self, handle: &NativeHandle) {
        self.owned.retain(|h| h.id() != handle.id());
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        let released = self
            .owned
            .drain(..)
            .filter(|handle| self.tracker.release(handle))
            .count();
        if released > 0 {
            tracing::debug!(released, "released remaining scratch handles");
        }
    }
}

/// Run the contour pipeline over an RGBA source buffer.
///
/// On success the returned [`ContourSet`] owns the winning contour
/// handles and a grayscale snapshot; they stay tracked until
/// [`ContourSet::release`] is called. Every other handle created by
/// the run has been released, whichever way the call returns.
///
/// Every contour above the area cutoff is kept. The result is only
/// allocated when it fits in the tracker next to the handles that were
/// already live, so it never evicts itself.
///
/// # Errors
///
/// - [`PipelineError::Validation`] when the backend is not ready, the
///   source buffer is empty or malformed, or `config` is invalid.
///   Nothing is allocated in that case.
/// - [`PipelineError::NoContoursFound`] when no contour exceeds the
///   profile's area cutoff.
/// - [`PipelineError::CapacityExceeded`] when the result would not fit
///   in the tracker. Nothing from the run stays allocated.
/// - [`PipelineError::Handle`] when an intermediate was evicted
///   underneath the run.
pub fn run_pipeline(
    backend: &dyn VisionBackend,
    tracker: &ResourceTracker,
    source: RawPixelBuffer,
    config: &PipelineConfig,
) -> Result<ContourSet, PipelineError> {
    if !backend.is_ready() {
        return Err(ValidationError::BackendNotReady.into());
    }
    config.validate()?;
    let rgba = source.into_rgba()?;
    let dimensions = Dimensions {
        width: rgba.width(),
        height: rgba.height(),
    };
    tracing::debug!(
        width = dimensions.width,
        height = dimensions.height,
        mode = %config.mode,
        profile = ?config.profile,
        "starting contour pipeline",
    );

    let mut scratch = Scratch::new(tracker);

    let src = scratch.alloc("source", NativeBuffer::Rgba(rgba));
    let gray = src.with_rgba(|img| backend.to_grayscale(img))?;
    let gray = scratch.alloc("grayscale", NativeBuffer::Gray(gray));
    scratch.release(&src);

    let pre_blurred = if config.blur_kernel > 1 {
        let img = gray.with_gray(|g| backend.gaussian_blur(g, config.blur_kernel))?;
        Some(scratch.alloc("pre-blur", NativeBuffer::Gray(img)))
    } else {
        None
    };

    let edges = config.mode.apply(
        backend,
        &mut scratch,
        pre_blurred.as_ref().unwrap_or(&gray),
        config.blur_kernel,
    )?;
    if let Some(pre_blurred) = &pre_blurred {
        scratch.release(pre_blurred);
    }

    let edges = match config.close_kernel {
        Some(spec) => {
            let closed = edge::close(backend, &mut scratch, &edges, spec)?;
            scratch.release(&edges);
            closed
        }
        None => edges,
    };

    let traced = edges.with_gray(|e| backend.find_contours(e))?;
    let traced = scratch.alloc("contours", NativeBuffer::Contours(traced));
    scratch.release(&edges);

    let min_area = contour::area_cutoff(dimensions, config.profile.min_area_fraction());
    let candidates: Vec<(usize, f64, Vec<_>)> = traced.with_contours(|list| {
        list.iter()
            .enumerate()
            .map(|(index, points)| (index, backend.contour_area(points), points.clone()))
            .collect()
    })?;
    let traced_count = candidates.len();
    scratch.release(&traced);

    let mut survivors = contour::filter_by_area(candidates, min_area, |(_, area, _)| *area);
    tracing::debug!(traced = traced_count, survivors = survivors.len(), min_area, "filtered contours");
    if survivors.is_empty() {
        return Err(PipelineError::NoContoursFound);
    }
    contour::rank_by_area(&mut survivors, |(_, area, _)| *area);

    let retained = gray.with_gray(GrayImage::clone)?;
    scratch.release(&gray);

    let needed = survivors.len() + 1;
    let live_elsewhere = tracker.usage().current.saturating_sub(scratch.owned_count());
    let available = tracker.capacity().saturating_sub(live_elsewhere);
    if needed > available {
        tracing::warn!(
            needed,
            available,
            live = live_elsewhere,
            "contour result does not fit in the tracker",
        );
        return Err(PipelineError::CapacityExceeded { needed, available });
    }

    let retained = scratch.alloc("retained grayscale", NativeBuffer::Gray(retained));

    let contours: Vec<Contour> = survivors
        .into_iter()
        .map(|(index, area, points)| {
            let handle = scratch.alloc(
                format!("contour {index}"),
                NativeBuffer::Contour(Polyline::new(points)),
            );
            Contour::new(handle, area, index)
        })
        .collect();

    if let Some(evicted) = contours
        .iter()
        .map(Contour::handle)
        .chain(std::iter::once(&retained))
        .find(|h| h.is_released())
    {
        return Err(HandleError::Released {
            label: evicted.label().to_owned(),
        }
        .into());
    }

    for handle in contours.iter().map(Contour::handle) {
        scratch.keep(handle);
    }
    scratch.keep(&retained);

    let mut ranked = contours.into_iter();
    let primary = ranked.next().ok_or(PipelineError::NoContoursFound)?;
    let set = ContourSet::new(primary, ranked.collect(), retained, dimensions, config.mode);
    tracing::debug!(
        contours = set.count(),
        primary_area = set.primary().area(),
        "contour pipeline finished",
    );
    Ok(set)
}
