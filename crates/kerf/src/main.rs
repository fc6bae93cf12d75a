//! kerf: Detect and rank closed contours in an image from the command line.
//!
//! Loads an image onto a workbench, runs one contour detection with the
//! chosen edge mode and profile, prints the ranked contours, and
//! optionally writes a heatmap preview with the contours drawn on top.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin kerf -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use kerf_io::{Detection, FileSurface, MemorySurface, Workbench, WorkbenchConfig};
use kerf_pipeline::edge::{DEFAULT_DETAIL, DEFAULT_SENSITIVITY};
use kerf_pipeline::{CannyThresholds, EdgeMode, PipelineConfig, TrackerConfig};

/// Contour detection over raster images.
///
/// Finds closed contours, keeps those above the profile's area cutoff,
/// and ranks them largest first.
#[derive(Parser)]
#[command(name = "kerf", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Contour size profile; also selects the default mode and blur.
    #[arg(long, value_enum, default_value_t = Profile::General)]
    profile: Profile,

    /// Edge mode. Defaults to the profile's mode.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Detail level for the adaptive mode.
    #[arg(long, default_value_t = DEFAULT_DETAIL)]
    detail: f32,

    /// Sensitivity for dynamic Canny thresholds.
    #[arg(long, default_value_t = DEFAULT_SENSITIVITY)]
    sensitivity: f32,

    /// Pre-blur kernel size (odd, 0 or 1 to disable). Defaults to the
    /// profile's value.
    #[arg(long)]
    blur_kernel: Option<u32>,

    /// Skip the closing step after edge detection.
    #[arg(long)]
    no_close: bool,

    /// Maximum number of live native buffers.
    #[arg(long, default_value_t = kerf_pipeline::tracker::DEFAULT_CAPACITY, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(2..))]
    capacity: usize,

    /// Pixel budget; larger images are downsampled on load.
    #[arg(long, default_value_t = kerf_pipeline::DEFAULT_MAX_PIXELS)]
    max_pixels: u64,

    /// Write a heatmap preview with the contours to this file.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Colormap for the preview heatmap.
    #[arg(long, value_enum, default_value_t = Colormap::Jet)]
    colormap: Colormap,

    /// Print the detection as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Contour size profile selection.
#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    /// Dynamic Canny, 5x5 blur, contours above 1% of the image.
    General,
    /// Adaptive threshold, no blur, contours above 0.2% of the image.
    FineDetail,
}

/// Edge mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Canny with thresholds derived from the mean intensity.
    Canny,
    /// Canny with fixed 50/150 thresholds.
    CannyBasic,
    /// Adaptive threshold against a local Gaussian mean.
    Adaptive,
    /// Dilate minus erode.
    Morphological,
    /// Blurred Sobel magnitude, closed.
    Gradient,
    /// Sobel magnitude.
    Sobel,
    /// Absolute Laplacian.
    Laplacian,
}

/// Preview colormap selection.
#[derive(Clone, Copy, ValueEnum)]
enum Colormap {
    Jet,
    Hot,
    Cool,
    Gray,
}

impl From<Colormap> for kerf_pipeline::Colormap {
    fn from(value: Colormap) -> Self {
        match value {
            Colormap::Jet => Self::Jet,
            Colormap::Hot => Self::Hot,
            Colormap::Cool => Self::Cool,
            Colormap::Gray => Self::Gray,
        }
    }
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise the profile's
/// preset is adjusted by the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        let mut config = match cli.profile {
            Profile::General => PipelineConfig::general(),
            Profile::FineDetail => PipelineConfig::fine_detail(),
        };
        if let Some(mode) = cli.mode {
            config.mode = match mode {
                Mode::Canny => EdgeMode::Canny {
                    thresholds: CannyThresholds::Dynamic {
                        sensitivity: cli.sensitivity,
                    },
                },
                Mode::CannyBasic => EdgeMode::Canny {
                    thresholds: CannyThresholds::BASIC,
                },
                Mode::Adaptive => EdgeMode::AdaptiveThreshold { detail: cli.detail },
                Mode::Morphological => EdgeMode::MorphologicalGradient,
                Mode::Gradient => EdgeMode::Gradient,
                Mode::Sobel => EdgeMode::Sobel,
                Mode::Laplacian => EdgeMode::Laplacian,
            };
        }
        if let Some(blur_kernel) = cli.blur_kernel {
            config.blur_kernel = blur_kernel;
        }
        if cli.no_close {
            config.close_kernel = None;
        }
        config
    };
    config.validate().map_err(|e| format!("Invalid configuration: {e}"))?;
    Ok(config)
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: PipelineConfig) -> ExitCode {
    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        path = %cli.image_path.display(),
        bytes = image_bytes.len(),
        mode = %config.mode,
        "processing image",
    );

    let workbench_config = WorkbenchConfig {
        tracker: TrackerConfig {
            capacity: cli.capacity,
            ..TrackerConfig::default()
        },
        max_pixels: cli.max_pixels,
        ..WorkbenchConfig::default()
    };
    let workbench = match Workbench::new(workbench_config, MemorySurface::new()) {
        Ok(workbench) => workbench,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let workbench = match &cli.preview {
        Some(path) => workbench.with_preview_surface(FileSurface::new(path)),
        None => workbench,
    };

    // Queue everything up front; the scheduler runs it in order.
    let load = workbench.load_image(image_bytes);
    let detect = workbench.detect(config);
    let preview = cli
        .preview
        .as_ref()
        .map(|_| workbench.render_preview(cli.colormap.into()));

    let loaded = match load.await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if loaded.downsampled {
        eprintln!(
            "Downsampled {}x{} to {}x{}",
            loaded.original.width,
            loaded.original.height,
            loaded.dimensions.width,
            loaded.dimensions.height,
        );
    }

    let detection = match detect.await {
        Ok(detection) => detection,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&detection) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing detection: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", report(&detection));
    }

    if let (Some(handle), Some(path)) = (preview, &cli.preview) {
        match handle.await {
            Ok(dims) => eprintln!(
                "Preview written to {} ({}x{})",
                path.display(),
                dims.width,
                dims.height,
            ),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let usage = workbench.usage();
    tracing::info!(
        live = usage.current,
        allocated = usage.total_allocated,
        capacity = usage.max,
        "native buffer usage",
    );
    ExitCode::SUCCESS
}

/// Human-readable summary of a detection.
fn report(detection: &Detection) -> String {
    let mut out = format!(
        "Mode: {}\nImage: {}x{}\nContours: {}\n\n{:<8} {:>12} {:>8} {:>8}\n{}",
        detection.mode,
        detection.dimensions.width,
        detection.dimensions.height,
        detection.contours.len(),
        "Rank",
        "Area (px²)",
        "Points",
        "Trace",
        "-".repeat(40),
    );
    for (rank, contour) in detection.contours.iter().enumerate() {
        let label = if rank == 0 {
            "primary".to_owned()
        } else {
            format!("#{rank}")
        };
        out.push_str(&format!(
            "\n{label:<8} {:>12.1} {:>8} {:>8}",
            contour.area,
            contour.points.len(),
            contour.trace_index,
        ));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kerf").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_to_general_preset() {
        let config = config_from_cli(&parse(&["in.png"])).unwrap();
        assert_eq!(config, PipelineConfig::general());
    }

    #[test]
    fn fine_detail_profile_selects_preset() {
        let config = config_from_cli(&parse(&["in.png", "--profile", "fine-detail"])).unwrap();
        assert_eq!(config, PipelineConfig::fine_detail());
    }

    #[test]
    fn flags_adjust_the_preset() {
        let cli = parse(&[
            "in.png",
            "--mode",
            "adaptive",
            "--detail",
            "9",
            "--blur-kernel",
            "3",
            "--no-close",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.mode, EdgeMode::AdaptiveThreshold { detail: 9.0 });
        assert_eq!(config.blur_kernel, 3);
        assert_eq!(config.close_kernel, None);
    }

    #[test]
    fn even_blur_kernel_is_rejected() {
        let err = config_from_cli(&parse(&["in.png", "--blur-kernel", "4"])).unwrap_err();
        assert!(err.starts_with("Invalid configuration"), "{err}");
    }

    #[test]
    fn config_json_overrides_flags() {
        let json = serde_json::to_string(&PipelineConfig::fine_detail()).unwrap();
        let cli = parse(&["in.png", "--mode", "sobel", "--config-json", &json]);
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::fine_detail());
    }

    #[test]
    fn capacity_below_two_is_rejected() {
        assert!(Cli::try_parse_from(["kerf", "in.png", "--capacity", "1"]).is_err());
    }
}
