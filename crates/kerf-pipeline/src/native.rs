//! Native handles: opaque, explicitly released buffer tokens.
//!
//! A [`NativeHandle`] stands in for a buffer allocated by an external
//! image-processing capability. Cloning a handle clones the *reference*,
//! not the buffer. The payload stays reachable until the handle is
//! released through [`ResourceTracker`](crate::tracker::ResourceTracker);
//! after that every accessor reports [`HandleError::Released`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use web_time::Instant;

use crate::morphology::StructuringElement;
use crate::types::{Point, Polyline};

/// Signed single-channel image produced by gradient operators.
pub type GradientImage = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Process-wide unique identity of a native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload owned by a native handle.
#[derive(Debug, Clone)]
pub enum NativeBuffer {
    /// Four-channel source image.
    Rgba(RgbaImage),
    /// Single-channel 8-bit image.
    Gray(GrayImage),
    /// Single-channel signed 16-bit image.
    Gradient(GradientImage),
    /// Structuring element for morphology.
    Kernel(StructuringElement),
    /// Every traced contour of one tracing pass.
    Contours(Vec<Vec<Point>>),
    /// One contour.
    Contour(Polyline),
}

impl NativeBuffer {
    /// Kind tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        match self {
            Self::Rgba(_) => BufferKind::Rgba,
            Self::Gray(_) => BufferKind::Gray,
            Self::Gradient(_) => BufferKind::Gradient,
            Self::Kernel(_) => BufferKind::Kernel,
            Self::Contours(_) => BufferKind::Contours,
            Self::Contour(_) => BufferKind::Contour,
        }
    }
}

/// Kind tag for [`NativeBuffer`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Rgba,
    Gray,
    Gradient,
    Kernel,
    Contours,
    Contour,
}

impl BufferKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rgba => "rgba image",
            Self::Gray => "gray image",
            Self::Gradient => "gradient image",
            Self::Kernel => "structuring element",
            Self::Contours => "contour list",
            Self::Contour => "contour",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access to a native handle failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The handle was released (explicitly, by eviction, or by reset).
    #[error("native buffer `{label}` was already released")]
    Released {
        /// Label of the handle.
        label: String,
    },

    /// The handle holds a different kind of buffer.
    #[error("native buffer `{label}` holds a {actual}, expected a {expected}")]
    WrongKind {
        /// Label of the handle.
        label: String,
        /// Kind the caller asked for.
        expected: BufferKind,
        /// Kind actually stored.
        actual: BufferKind,
    },
}

struct HandleCell {
    id: HandleId,
    label: String,
    created_at: Instant,
    released: AtomicBool,
    buffer: Mutex<Option<NativeBuffer>>,
}

/// Shared reference to an externally allocated buffer.
#[derive(Clone)]
pub struct NativeHandle(Arc<HandleCell>);

impl NativeHandle {
    /// Wrap a freshly allocated buffer.
    #[must_use]
    pub fn new(label: impl Into<String>, buffer: NativeBuffer) -> Self {
        Self(Arc::new(HandleCell {
            id: HandleId::next(),
            label: label.into(),
            created_at: Instant::now(),
            released: AtomicBool::new(false),
            buffer: Mutex::new(Some(buffer)),
        }))
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.0.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.0.created_at
    }

    /// Whether the handle has been released. Once `true`, stays `true`.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.0.released.load(Ordering::Acquire)
    }

    /// Kind of the stored payload, or `None` once released.
    #[must_use]
    pub fn kind(&self) -> Option<BufferKind> {
        self.lock().as_ref().map(NativeBuffer::kind)
    }

    /// Flip the released flag. Returns `true` only for the call that
    /// performed the transition.
    pub(crate) fn mark_released(&self) -> bool {
        !self.0.released.swap(true, Ordering::AcqRel)
    }

    /// Move the payload out for disposal.
    pub(crate) fn take_buffer(&self) -> Option<NativeBuffer> {
        self.lock().take()
    }

    /// Borrow the payload.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Released`] if the handle was released.
    pub fn with<R>(&self, f: impl FnOnce(&NativeBuffer) -> R) -> Result<R, HandleError> {
        let guard = self.lock();
        match guard.as_ref() {
            Some(buffer) if !self.is_released() => Ok(f(buffer)),
            _ => Err(self.released_error()),
        }
    }

    /// Borrow the payload as a grayscale image.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not a gray image.
    pub fn with_gray<R>(&self, f: impl FnOnce(&GrayImage) -> R) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Gray(img) => Ok(f(img)),
            other => Err(self.wrong_kind(BufferKind::Gray, other)),
        })?
    }

    /// Borrow the payload as an RGBA image.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not an RGBA image.
    pub fn with_rgba<R>(&self, f: impl FnOnce(&RgbaImage) -> R) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Rgba(img) => Ok(f(img)),
            other => Err(self.wrong_kind(BufferKind::Rgba, other)),
        })?
    }

    /// Borrow the payload as a signed gradient image.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not a gradient image.
    pub fn with_gradient<R>(
        &self,
        f: impl FnOnce(&GradientImage) -> R,
    ) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Gradient(img) => Ok(f(img)),
            other => Err(self.wrong_kind(BufferKind::Gradient, other)),
        })?
    }

    /// Borrow the payload as a structuring element.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not a structuring element.
    pub fn with_kernel<R>(
        &self,
        f: impl FnOnce(&StructuringElement) -> R,
    ) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Kernel(element) => Ok(f(element)),
            other => Err(self.wrong_kind(BufferKind::Kernel, other)),
        })?
    }

    /// Borrow the payload as a list of traced contours.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not a contour list.
    pub fn with_contours<R>(&self, f: impl FnOnce(&[Vec<Point>]) -> R) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Contours(list) => Ok(f(list)),
            other => Err(self.wrong_kind(BufferKind::Contours, other)),
        })?
    }

    /// Borrow the payload as a single contour.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if released or not a single contour.
    pub fn with_points<R>(&self, f: impl FnOnce(&Polyline) -> R) -> Result<R, HandleError> {
        self.with(|buffer| match buffer {
            NativeBuffer::Contour(polyline) => Ok(f(polyline)),
            other => Err(self.wrong_kind(BufferKind::Contour, other)),
        })?
    }

    fn lock(&self) -> MutexGuard<'_, Option<NativeBuffer>> {
        self.0.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn released_error(&self) -> HandleError {
        HandleError::Released {
            label: self.0.label.clone(),
        }
    }

    fn wrong_kind(&self, expected: BufferKind, actual: &NativeBuffer) -> HandleError {
        HandleError::WrongKind {
            label: self.0.label.clone(),
            expected,
            actual: actual.kind(),
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gray_handle() -> NativeHandle {
        NativeHandle::new("gray", NativeBuffer::Gray(GrayImage::new(4, 3)))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = gray_handle();
        let b = gray_handle();
        assert!(b.id() > a.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clones_share_identity_and_state() {
        let a = gray_handle();
        let b = a.clone();
        assert_eq!(a.id(), b.id());
        assert!(a.mark_released());
        assert!(b.is_released());
    }

    #[test]
    fn mark_released_transitions_once() {
        let h = gray_handle();
        assert!(!h.is_released());
        assert!(h.mark_released());
        assert!(!h.mark_released());
        assert!(h.is_released());
    }

    #[test]
    fn typed_access_reads_payload() {
        let h = gray_handle();
        assert_eq!(h.with_gray(GrayImage::dimensions).unwrap(), (4, 3));
        assert_eq!(h.kind(), Some(BufferKind::Gray));
    }

    #[test]
    fn wrong_kind_is_reported() {
        let h = gray_handle();
        let err = h.with_rgba(|_| ()).unwrap_err();
        assert_eq!(
            err,
            HandleError::WrongKind {
                label: "gray".to_owned(),
                expected: BufferKind::Rgba,
                actual: BufferKind::Gray,
            }
        );
        assert_eq!(
            err.to_string(),
            "native buffer `gray` holds a gray image, expected a rgba image"
        );
    }

    #[test]
    fn access_after_release_fails() {
        let h = gray_handle();
        h.mark_released();
        let taken = h.take_buffer();
        assert!(matches!(taken, Some(NativeBuffer::Gray(_))));
        assert_eq!(
            h.with_gray(|_| ()).unwrap_err(),
            HandleError::Released {
                label: "gray".to_owned()
            }
        );
        assert_eq!(h.kind(), None);
    }

    #[test]
    fn released_flag_alone_blocks_access() {
        let h = gray_handle();
        h.mark_released();
        assert!(h.with(|_| ()).is_err());
    }

    #[test]
    fn debug_omits_payload() {
        let h = gray_handle();
        let rendered = format!("{h:?}");
        assert!(rendered.contains("label: \"gray\""));
        assert!(!rendered.contains("ImageBuffer"));
    }
}
