//! Integration test: a workbench session driven entirely through the
//! scheduler, with submissions queued before any of them completes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use kerf_io::sink::SinkEvent;
use kerf_io::{
    MemorySurface, RecordingSink, SchedulerConfig, Workbench, WorkbenchConfig, WorkbenchError,
};
use kerf_pipeline::preview::Colormap;
use kerf_pipeline::{ImageprocBackend, PipelineConfig};

fn two_squares_png() -> Vec<u8> {
    let image = RgbaImage::from_fn(160, 120, |x, y| {
        let big = (20..80).contains(&x) && (20..80).contains(&y);
        let small = (100..130).contains(&x) && (30..60).contains(&y);
        if big || small {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn workbench(sink: &Arc<RecordingSink>) -> Workbench {
    let config = WorkbenchConfig {
        scheduler: SchedulerConfig {
            inter_task_delay: Duration::from_millis(1),
            ..SchedulerConfig::default()
        },
        auto_cleanup_interval: None,
        ..WorkbenchConfig::default()
    };
    Workbench::with_parts(
        config,
        MemorySurface::new(),
        Arc::new(ImageprocBackend),
        sink.clone(),
        sink.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn queued_operations_run_in_order() {
    let sink = Arc::new(RecordingSink::new());
    let bench = workbench(&sink);

    // Queued before the image exists; runs after the load completes.
    let load = bench.load_image(two_squares_png());
    let detect = bench.detect(PipelineConfig::general());
    let preview = bench.render_preview(Colormap::Hot);

    let detection = detect.await.expect("detection should succeed");
    let loaded = load.await.unwrap();
    let dims = preview.await.unwrap();

    assert_eq!(dims, loaded.dimensions);
    assert_eq!(detection.contours.len(), 2);
    let areas: Vec<f64> = detection.contours.iter().map(|c| c.area).collect();
    assert!(areas[0] > 3.0 * areas[1], "{areas:?}");

    let started: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SinkEvent::Started(label) => Some(label),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["load image", "detect contours", "render preview"]);
    assert!(sink.notifications().is_empty());
}

#[tokio::test]
async fn failures_are_notified_and_do_not_block_the_queue() {
    let sink = Arc::new(RecordingSink::new());
    let bench = workbench(&sink);

    let premature = bench.detect(PipelineConfig::fine_detail());
    let load = bench.load_image(two_squares_png());
    let detect = bench.detect(PipelineConfig::fine_detail());

    let err = premature.await.unwrap_err();
    assert!(matches!(
        err.into_source(),
        Some(WorkbenchError::Pipeline(_))
    ));
    load.await.unwrap();
    let detection = detect.await.unwrap();
    assert_eq!(detection.mode, "adaptive");
    assert!(!detection.contours.is_empty());

    assert_eq!(
        sink.notifications(),
        vec!["detect contours failed: no source image loaded"]
    );

    assert_eq!(bench.reset().await.unwrap(), detection.contours.len() + 1);
    assert_eq!(bench.usage().current, 0);
}
