//! The workbench: one context object owning everything a session shares.
//!
//! A [`Workbench`] bundles the vision backend, the resource tracker, the
//! task scheduler, the source and preview surfaces and the most recent
//! detection result. Every operation that touches a surface or native
//! buffers is submitted to the scheduler, so loads, detections and
//! previews never interleave.
//!
//! Loaded images go to the source surface, which detection reads.
//! Previews are drawn to a separate preview surface and never feed back
//! into detection.
//!
//! The previous detection result is released only after a new detection
//! has succeeded; a failed detection leaves it intact. The one exception
//! is a new result that does not fit in the tracker next to the old one:
//! the old result is then released and the detection retried once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kerf_pipeline::downsample::fit_pixel_budget;
use kerf_pipeline::grayscale::decode_rgba;
use kerf_pipeline::preview::{self, Colormap};
use kerf_pipeline::{
    ContourSet, DEFAULT_MAX_PIXELS, Dimensions, Disposer, DownsampleFilter, ImageprocBackend,
    PipelineConfig, PipelineError, Polyline, RawPixelBuffer, ResourceTracker, TrackerConfig,
    Usage, ValidationError, VisionBackend,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::cleanup::{AutoCleanup, DEFAULT_CLEANUP_INTERVAL};
use crate::scheduler::{NoRuntime, SchedulerConfig, TaskHandle, TaskScheduler};
use crate::sink::{NotificationSink, ProgressSink, TracingNotifier, TracingProgress};
use crate::surface::{DrawingSurface, MemorySurface, SurfaceError};

/// Largest encoded image accepted by [`Workbench::load_image`] (10 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Workbench settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    pub tracker: TrackerConfig,
    pub scheduler: SchedulerConfig,
    /// Loaded images above this many pixels are downsampled.
    pub max_pixels: u64,
    /// Resampling filter for downsampling.
    pub downsample: DownsampleFilter,
    /// Encoded images larger than this are rejected.
    pub max_input_bytes: usize,
    /// Period of the background tracker cleanup, `None` to disable.
    #[serde(with = "crate::millis::option")]
    pub auto_cleanup_interval: Option<Duration>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_pixels: DEFAULT_MAX_PIXELS,
            downsample: DownsampleFilter::default(),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            auto_cleanup_interval: Some(DEFAULT_CLEANUP_INTERVAL),
        }
    }
}

/// Errors returned by workbench tasks.
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    /// The encoded image exceeds the configured size limit.
    #[error("image is {size} bytes, the limit is {max}")]
    InputTooLarge { size: usize, max: usize },

    /// A preview was requested before any successful detection.
    #[error("no detection result available")]
    NoResult,
}

/// Outcome of [`Workbench::load_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadedImage {
    /// Size of the decoded image.
    pub original: Dimensions,
    /// Size written to the surface.
    pub dimensions: Dimensions,
    /// Whether the pixel budget forced a downsample.
    pub downsampled: bool,
}

/// One contour of a [`Detection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedContour {
    pub area: f64,
    pub trace_index: usize,
    pub points: Polyline,
}

/// Plain-data copy of a detection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Name of the edge mode used.
    pub mode: String,
    pub dimensions: Dimensions,
    /// All contours, primary first.
    pub contours: Vec<DetectedContour>,
}

impl Detection {
    fn from_set(set: &ContourSet) -> Result<Self, PipelineError> {
        let contours = set
            .iter()
            .map(|contour| {
                Ok(DetectedContour {
                    area: contour.area(),
                    trace_index: contour.trace_index(),
                    points: contour.points()?,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok(Self {
            mode: set.mode().to_string(),
            dimensions: set.dimensions(),
            contours,
        })
    }

    /// The largest contour.
    #[must_use]
    pub fn primary(&self) -> Option<&DetectedContour> {
        self.contours.first()
    }
}

type SharedSurface = Arc<Mutex<Box<dyn DrawingSurface>>>;
type SharedResult = Arc<Mutex<Option<ContourSet>>>;

/// Session context: backend, tracker, scheduler, surfaces, last result.
pub struct Workbench {
    config: WorkbenchConfig,
    backend: Arc<dyn VisionBackend>,
    tracker: Arc<ResourceTracker>,
    scheduler: TaskScheduler,
    surface: SharedSurface,
    preview: SharedSurface,
    result: SharedResult,
    cleanup: Mutex<Option<AutoCleanup>>,
    runtime: Handle,
}

impl Workbench {
    /// Workbench on the default backend, reporting through `tracing`.
    ///
    /// `surface` holds the loaded source image. Previews go to an
    /// in-memory surface unless [`with_preview_surface`](Self::with_preview_surface)
    /// replaces it. Starts the auto cleanup loop when configured.
    ///
    /// # Errors
    ///
    /// Returns [`NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: WorkbenchConfig, surface: impl DrawingSurface + 'static) -> Result<Self, NoRuntime> {
        Self::with_parts(
            config,
            surface,
            Arc::new(ImageprocBackend),
            Arc::new(TracingProgress),
            Arc::new(TracingNotifier),
        )
    }

    /// Workbench with an explicit backend and sinks. The backend also
    /// disposes the buffers it produced.
    ///
    /// # Errors
    ///
    /// Returns [`NoRuntime`] when called outside a tokio runtime.
    pub fn with_parts<B>(
        config: WorkbenchConfig,
        surface: impl DrawingSurface + 'static,
        backend: Arc<B>,
        progress: Arc<dyn ProgressSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, NoRuntime>
    where
        B: VisionBackend + Disposer + 'static,
    {
        let scheduler = TaskScheduler::new(config.scheduler, progress, notifier)?;
        let runtime = Handle::try_current()?;
        let disposer: Arc<dyn Disposer> = backend.clone();
        let tracker = Arc::new(ResourceTracker::with_disposer(config.tracker, disposer));
        let workbench = Self {
            config,
            backend,
            tracker,
            scheduler,
            surface: shared(surface),
            preview: shared(MemorySurface::new()),
            result: Arc::new(Mutex::new(None)),
            cleanup: Mutex::new(None),
            runtime,
        };
        if let Some(interval) = config.auto_cleanup_interval {
            workbench.start_auto_cleanup(interval);
        }
        Ok(workbench)
    }

    /// Draw previews onto `surface`.
    #[must_use]
    pub fn with_preview_surface(mut self, surface: impl DrawingSurface + 'static) -> Self {
        self.preview = shared(surface);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    #[must_use]
    pub const fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Decode an encoded image, fit it to the pixel budget and draw it
    /// onto the source surface.
    pub fn load_image(&self, bytes: Vec<u8>) -> TaskHandle<LoadedImage, WorkbenchError> {
        let surface = Arc::clone(&self.surface);
        let WorkbenchConfig {
            max_pixels,
            downsample,
            max_input_bytes,
            ..
        } = self.config;
        self.scheduler.submit("load image", move || async move {
            if bytes.len() > max_input_bytes {
                return Err(WorkbenchError::InputTooLarge {
                    size: bytes.len(),
                    max: max_input_bytes,
                });
            }
            let image = decode_rgba(&bytes)?;
            let original = Dimensions {
                width: image.width(),
                height: image.height(),
            };
            let (image, downsampled) = fit_pixel_budget(image, max_pixels, downsample);
            let buffer = RawPixelBuffer::from_rgba(image);
            lock(&surface).write_buffer(&buffer)?;
            let dimensions = buffer.dimensions();
            tracing::info!(
                width = dimensions.width,
                height = dimensions.height,
                downsampled,
                "image loaded",
            );
            Ok(LoadedImage {
                original,
                dimensions,
                downsampled,
            })
        })
    }

    /// Run the contour pipeline on the source surface's current raster.
    ///
    /// On success the new result replaces the retained one, whose
    /// handles are then released. When the new result does not fit in
    /// the tracker next to the retained one, the retained one is
    /// released first and the run repeated.
    pub fn detect(&self, config: PipelineConfig) -> TaskHandle<Detection, WorkbenchError> {
        let backend = Arc::clone(&self.backend);
        let tracker = Arc::clone(&self.tracker);
        let surface = Arc::clone(&self.surface);
        let result = Arc::clone(&self.result);
        self.scheduler.submit("detect contours", move || async move {
            let source = read_source(&surface)?;
            let set = match kerf_pipeline::run_pipeline(backend.as_ref(), &tracker, source, &config) {
                Err(PipelineError::CapacityExceeded { needed, available }) => {
                    let previous = lock(&result).take();
                    let Some(previous) = previous else {
                        return Err(PipelineError::CapacityExceeded { needed, available }.into());
                    };
                    let released = previous.release(&tracker);
                    tracing::info!(released, needed, available, "released previous result to make room");
                    let source = read_source(&surface)?;
                    kerf_pipeline::run_pipeline(backend.as_ref(), &tracker, source, &config)?
                }
                other => other?,
            };
            let detection = match Detection::from_set(&set) {
                Ok(detection) => detection,
                Err(err) => {
                    set.release(&tracker);
                    return Err(err.into());
                }
            };

            let previous = lock(&result).replace(set);
            if let Some(previous) = previous {
                let released = previous.release(&tracker);
                tracing::debug!(released, "released previous result");
            }
            tracing::info!(
                contours = detection.contours.len(),
                primary_area = detection.primary().map_or(0.0, |c| c.area),
                mode = %detection.mode,
                "contours detected",
            );
            Ok(detection)
        })
    }

    /// Draw the heatmap and contour overlay of the retained result onto
    /// the preview surface.
    pub fn render_preview(&self, colormap: Colormap) -> TaskHandle<Dimensions, WorkbenchError> {
        let surface = Arc::clone(&self.preview);
        let result = Arc::clone(&self.result);
        self.scheduler.submit("render preview", move || async move {
            let canvas = {
                let guard = lock(&result);
                let set = guard.as_ref().ok_or(WorkbenchError::NoResult)?;
                preview::render_preview(set, colormap).map_err(PipelineError::from)?
            };
            let buffer = RawPixelBuffer::from_rgba(canvas);
            lock(&surface).write_buffer(&buffer)?;
            Ok(buffer.dimensions())
        })
    }

    /// Grayscale value of the retained snapshot under surface position
    /// `(x, y)`; 128 when there is no usable result.
    #[must_use]
    pub fn sample_gray_at(&self, x: f64, y: f64) -> u8 {
        lock(&self.result).as_ref().map_or(preview::NEUTRAL_GRAY, |set| {
            preview::sample_retained(set.retained_gray(), x, y, set.dimensions())
        })
    }

    /// Whether a detection result is retained.
    #[must_use]
    pub fn has_result(&self) -> bool {
        lock(&self.result).is_some()
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        self.tracker.usage()
    }

    /// Drop the retained result and release every tracked handle.
    pub fn reset(&self) -> TaskHandle<usize, WorkbenchError> {
        let tracker = Arc::clone(&self.tracker);
        let result = Arc::clone(&self.result);
        self.scheduler.submit("reset", move || async move {
            lock(&result).take();
            let released = tracker.release_all();
            tracing::info!(released, "workbench reset");
            Ok(released)
        })
    }

    /// (Re)start the background cleanup loop.
    pub fn start_auto_cleanup(&self, interval: Duration) {
        let cleanup = AutoCleanup::spawn(&self.runtime, Arc::clone(&self.tracker), interval);
        // Dropping the previous loop stops it.
        *lock(&self.cleanup) = Some(cleanup);
    }

    /// Stop the background cleanup loop. Returns whether one was running.
    pub fn stop_auto_cleanup(&self) -> bool {
        lock(&self.cleanup).take().is_some()
    }
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .field("scheduler", &self.scheduler)
            .field("has_result", &self.has_result())
            .finish_non_exhaustive()
    }
}

fn shared(surface: impl DrawingSurface + 'static) -> SharedSurface {
    let surface: Box<dyn DrawingSurface> = Box::new(surface);
    Arc::new(Mutex::new(surface))
}

fn read_source(surface: &SharedSurface) -> Result<RawPixelBuffer, WorkbenchError> {
    lock(surface).read_buffer().map_err(|err| match err {
        SurfaceError::Empty => PipelineError::from(ValidationError::NoSourceImage).into(),
        other => other.into(),
    })
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
