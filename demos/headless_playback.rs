//! Runs a synthetic decoder thread against a render loop that only logs.
//!
//! `RUST_LOG=debug cargo run --example headless_playback [snapshot.png]`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use video_frame_pipeline::{
    ContentFit, DrawLease, FramePipeline, FrameView, PipelineConfig, RenderBackend, RenderConsumer,
    Retention, Transform,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

struct LogBackend {
    snapshot: Option<image::RgbaImage>,
}

impl RenderBackend for LogBackend {
    fn draw_frame(
        &mut self,
        frame: &FrameView<'_>,
        transform: &Transform,
        _lease: Option<DrawLease>,
    ) {
        log::info!(
            "frame {} on surface #{} at {:?}",
            frame.sequence,
            frame.id,
            transform.apply(0.0, 0.0)
        );
        self.snapshot = frame.to_image();
    }

    fn draw_placeholder(&mut self, _transform: &Transform) {
        log::info!("placeholder");
    }
}

fn gradient(frame: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            pixels.extend_from_slice(&[
                ((x + frame * 4) % 256) as u8,
                (y % 256) as u8,
                (frame % 256) as u8,
                255,
            ]);
        }
    }
    pixels
}

fn main() {
    env_logger::init();

    let pipeline =
        FramePipeline::new(PipelineConfig::new(WIDTH, HEIGHT)).expect("failed to build pipeline");
    let invalidated = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invalidated);
    pipeline.on_frame_ready(move || flag.store(true, Ordering::SeqCst));

    let decoder = {
        let pipeline = pipeline.clone();
        std::thread::spawn(move || {
            for frame in 0..60 {
                if let Err(err) = pipeline.push_frame(&gradient(frame)) {
                    log::error!("decoder stopped: {err}");
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let mut consumer = RenderConsumer::new(pipeline.clone(), Retention::Immediate)
        .expect("failed to build consumer");
    let mut backend = LogBackend { snapshot: None };
    let transform = Transform::fit(
        ContentFit::Contain,
        (WIDTH as f32, HEIGHT as f32),
        (640.0, 640.0),
    );

    for _ in 0..90 {
        if invalidated.swap(false, Ordering::SeqCst) || pipeline.queued() > 1 {
            if let Err(err) = consumer.draw(&mut backend, &transform) {
                log::error!("draw failed: {err}");
            }
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    decoder.join().expect("decoder thread panicked");
    log::info!("decode pool: {:?}", pipeline.stats());
    log::info!("display pool: {:?}", consumer.surface_stats());

    if let (Some(path), Some(snapshot)) = (std::env::args().nth(1), backend.snapshot.as_ref()) {
        snapshot.save(&path).expect("failed to save snapshot");
        log::info!("saved last frame to {path}");
    }

    consumer.dispose().expect("consumer already disposed");
    pipeline.dispose().expect("pipeline already disposed");
}
