// Integration test: decoder thread and render loop sharing one pipeline

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use video_frame_pipeline::{
    BufferPool, BufferState, DrawLease, Error, FrameFormat, FramePipeline, FrameView,
    PipelineConfig, PixelFormat, Presented, RenderBackend, RenderConsumer, Retention, Transform,
};

/// Checks every drawn frame and keeps leases alive for a few draws, like a
/// backend whose GPU work trails the submit call.
struct TrailingBackend {
    in_flight: VecDeque<DrawLease>,
    depth: usize,
    presented: Vec<u64>,
    placeholders: usize,
}

impl TrailingBackend {
    fn new(depth: usize) -> Self {
        Self {
            in_flight: VecDeque::new(),
            depth,
            presented: Vec::new(),
            placeholders: 0,
        }
    }
}

impl RenderBackend for TrailingBackend {
    fn draw_frame(
        &mut self,
        frame: &FrameView<'_>,
        _transform: &Transform,
        lease: Option<DrawLease>,
    ) {
        let expected = ((frame.sequence - 1) % 256) as u8;
        assert!(
            frame.pixels.iter().all(|&b| b == expected),
            "frame {} has torn or stale pixels",
            frame.sequence
        );
        if self.presented.last() != Some(&frame.sequence) {
            self.presented.push(frame.sequence);
        }
        self.in_flight.extend(lease);
        while self.in_flight.len() > self.depth {
            self.in_flight.pop_front();
        }
    }

    fn draw_placeholder(&mut self, _transform: &Transform) {
        self.placeholders += 1;
    }
}

fn spawn_producer(
    pipeline: FramePipeline,
    frames: usize,
    done: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let len = pipeline.source_len();
        for i in 0..frames {
            pipeline.push_frame(&vec![(i % 256) as u8; len]).unwrap();
            if i % 7 == 0 {
                thread::yield_now();
            }
        }
        done.store(true, Ordering::SeqCst);
    })
}

#[test]
fn test_every_frame_presented_in_order() {
    let pipeline = FramePipeline::new(PipelineConfig::new(32, 32)).unwrap();
    let mut consumer = RenderConsumer::new(pipeline.clone(), Retention::Deferred).unwrap();
    let mut backend = TrailingBackend::new(2);
    let done = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(pipeline.clone(), 200, Arc::clone(&done));

    loop {
        consumer.draw(&mut backend, &Transform::identity()).unwrap();
        if done.load(Ordering::SeqCst) && pipeline.queued() <= 1 {
            break;
        }
    }
    producer.join().unwrap();
    consumer.draw(&mut backend, &Transform::identity()).unwrap();

    assert_eq!(backend.presented, (1..=200).collect::<Vec<u64>>());
    // The last frame is a still image now and stays queued.
    assert_eq!(pipeline.queued(), 1);
}

#[test]
fn test_teardown_during_playback_releases_every_buffer() {
    let pipeline = FramePipeline::new(PipelineConfig::new(16, 16)).unwrap();
    let mut consumer = RenderConsumer::new(pipeline.clone(), Retention::Deferred).unwrap();
    let mut backend = TrailingBackend::new(3);

    let producer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            let len = pipeline.source_len();
            let mut pushed = 0usize;
            loop {
                match pipeline.push_frame(&vec![(pushed % 256) as u8; len]) {
                    Ok(_) => pushed += 1,
                    Err(Error::UseAfterDispose) => return pushed,
                    Err(err) => panic!("unexpected producer error: {err}"),
                }
                thread::yield_now();
            }
        })
    };

    for _ in 0..50 {
        consumer.draw(&mut backend, &Transform::identity()).unwrap();
    }
    pipeline.dispose().unwrap();
    let pushed = producer.join().unwrap();
    assert!(pushed > 0);

    let presented = consumer.draw(&mut backend, &Transform::identity()).unwrap();
    assert_eq!(presented, Presented::Placeholder);

    let stats = pipeline.stats();
    assert_eq!(stats.allocated, stats.destroyed);

    consumer.dispose().unwrap();
    drop(backend);
    let stats = consumer.surface_stats();
    assert_eq!(stats.allocated, stats.destroyed);
}

#[test]
fn test_teardown_races_render_thread() {
    for round in 0..50 {
        let config = PipelineConfig::new(16, 16).deferred_disposal(round % 2 == 0);
        let pipeline = FramePipeline::new(config).unwrap();

        let producer = {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                let len = pipeline.source_len();
                let mut pushed = 0usize;
                loop {
                    match pipeline.push_frame(&vec![(pushed % 256) as u8; len]) {
                        Ok(_) => pushed += 1,
                        Err(Error::UseAfterDispose) => return,
                        Err(err) => panic!("unexpected producer error: {err}"),
                    }
                }
            })
        };

        let renderer = {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                let mut consumer = RenderConsumer::new(pipeline.clone(), Retention::Deferred)
                    .unwrap();
                let mut backend = TrailingBackend::new(3);
                while !pipeline.is_disposed() {
                    consumer.draw(&mut backend, &Transform::identity()).unwrap();
                }
                let presented = consumer.draw(&mut backend, &Transform::identity()).unwrap();
                assert_eq!(presented, Presented::Placeholder);
                (consumer, backend)
            })
        };

        thread::sleep(Duration::from_micros(200));
        pipeline.dispose().unwrap();
        producer.join().unwrap();
        let (mut consumer, backend) = renderer.join().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.allocated, stats.destroyed, "decode pool, round {round}");

        consumer.dispose().unwrap();
        drop(backend);
        let stats = consumer.surface_stats();
        assert_eq!(stats.allocated, stats.destroyed, "surface pool, round {round}");
    }
}

#[test]
fn test_pool_teardown_with_buffer_in_flight() {
    let format = FrameFormat::new(64, 64, PixelFormat::Rgba8).unwrap();
    let pool = BufferPool::new(format, 2, true).unwrap();
    let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(pool.stats().total_buffers, 3);
    pool.recycle(Arc::clone(&held[0])).unwrap();
    pool.recycle(Arc::clone(&held[1])).unwrap();

    pool.dispose().unwrap();
    assert_eq!(held[0].state(), BufferState::Destroyed);
    assert_eq!(held[1].state(), BufferState::Destroyed);
    assert_eq!(held[2].state(), BufferState::PendingDispose);
    assert!(matches!(pool.dispose(), Err(Error::AlreadyDisposed)));

    pool.recycle(Arc::clone(&held[2])).unwrap();
    assert_eq!(held[2].state(), BufferState::Destroyed);
    assert_eq!(pool.stats().destroyed, 3);
}
