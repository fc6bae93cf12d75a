//! kerf-pipeline: Contour detection over tracked native buffers (sans-IO).
//!
//! Turns an RGBA pixel buffer into a ranked set of closed contours:
//! grayscale -> optional blur -> edge mode -> optional closing ->
//! contour tracing -> area filter -> ranking.
//!
//! Every intermediate buffer lives behind a [`NativeHandle`] registered
//! with a bounded [`ResourceTracker`]. Intermediates are released as soon
//! as the next step has consumed them; the winning contours and a
//! grayscale snapshot are handed back in a [`ContourSet`] that the caller
//! releases explicitly.
//!
//! This crate has **no I/O or async dependencies**. Scheduling, periodic
//! cleanup and file handling live in `kerf-io`.

pub mod backend;
pub mod blur;
pub mod canny;
pub mod contour;
pub mod downsample;
pub mod edge;
pub mod filter;
pub mod grayscale;
pub mod morphology;
pub mod native;
pub mod pipeline;
pub mod preview;
pub mod tracker;
pub mod types;

pub use backend::{ImageprocBackend, VisionBackend};
pub use contour::{Contour, ContourSet};
pub use downsample::{DEFAULT_MAX_PIXELS, DownsampleFilter};
pub use edge::{CannyThresholds, EdgeMode};
pub use morphology::{KernelShape, KernelSpec};
pub use native::{BufferKind, HandleError, HandleId, NativeBuffer, NativeHandle};
pub use pipeline::{PipelineConfig, Profile, run_pipeline};
pub use preview::{Colormap, render_preview};
pub use tracker::{Disposer, DropDisposer, ResourceError, ResourceTracker, TrackerConfig, Usage};
pub use types::{Dimensions, PipelineError, Point, Polyline, RawPixelBuffer, ValidationError};
