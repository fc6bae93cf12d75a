//! kerf-io: Async shell around the kerf contour pipeline.
//!
//! Provides the single-flight [`TaskScheduler`] every shared-state
//! operation goes through, drawing surfaces for loading images and
//! drawing previews, periodic tracker cleanup, and the [`Workbench`]
//! context object that ties them together.

mod millis;

pub mod cleanup;
pub mod scheduler;
pub mod sink;
pub mod surface;
pub mod workbench;

pub use cleanup::AutoCleanup;
pub use scheduler::{
    NoRuntime, SchedulerConfig, SchedulerState, TaskError, TaskHandle, TaskScheduler,
};
pub use sink::{NotificationSink, ProgressSink, RecordingSink, TracingNotifier, TracingProgress};
pub use surface::{DrawingSurface, FileSurface, MemorySurface, SurfaceError};
pub use workbench::{Detection, LoadedImage, Workbench, WorkbenchConfig, WorkbenchError};
