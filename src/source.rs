use crate::{Error, FramePipeline, PipelineConfig, PixelFormat};
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_app::prelude::*;
use gstreamer_video as gst_video;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// A GStreamer decoder feeding a [`FramePipeline`] from a worker thread.
///
/// The pipeline is sized from the negotiated caps. Dropping the source stops
/// the worker and disposes the frame pipeline.
#[derive(Debug)]
pub struct VideoSource {
    source: gst::Pipeline,
    frames: FramePipeline,
    alive: Arc<AtomicBool>,
    resolution_changed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    framerate: f64,
    duration: Duration,
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(err) = self.source.set_state(gst::State::Null) {
            log::error!("failed to stop video source: {err}");
        }

        self.alive.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.join() {
                match err.downcast_ref::<String>() {
                    Some(e) => log::error!("Decoder thread panicked: {e}"),
                    None => log::error!("Decoder thread panicked with unknown reason"),
                }
            }
        }

        if !self.frames.is_disposed() {
            if let Err(err) = self.frames.dispose() {
                log::warn!("failed to dispose frame pipeline: {err}");
            }
        }
    }
}

impl VideoSource {
    /// Decode the media at `uri` into RGBA frames.
    pub fn new(uri: &url::Url) -> Result<Self, Error> {
        gst::init()?;

        let pipeline = format!(
            "playbin uri=\"{}\" video-sink=\"videoscale ! videoconvert ! appsink name=frame_sink drop=true caps=video/x-raw,format=RGBA,pixel-aspect-ratio=1/1\"",
            uri.as_str()
        );
        let pipeline = gst::parse::launch(pipeline.as_ref())?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::Cast)?;

        let video_sink: gst::Element = pipeline.property("video-sink");
        let pad = video_sink.pads().first().cloned().ok_or(Error::Cast)?;
        let pad = pad
            .dynamic_cast::<gst::GhostPad>()
            .map_err(|_| Error::Cast)?;
        let bin = pad
            .parent_element()
            .ok_or(Error::Cast)?
            .downcast::<gst::Bin>()
            .map_err(|_| Error::Cast)?;
        let video_sink = bin
            .by_name("frame_sink")
            .ok_or(Error::Cast)?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| Error::Cast)?;

        Self::from_gst_pipeline(pipeline, video_sink)
    }

    /// Drive an existing pipeline whose appsink delivers RGBA/BGRA frames.
    pub fn from_gst_pipeline(
        pipeline: gst::Pipeline,
        video_sink: gst_app::AppSink,
    ) -> Result<Self, Error> {
        gst::init()?;

        macro_rules! cleanup {
            ($expr:expr) => {
                $expr.map_err(|e| {
                    let _ = pipeline.set_state(gst::State::Null);
                    e
                })
            };
        }

        let pad = cleanup!(video_sink.pads().first().cloned().ok_or(Error::Caps))?;

        cleanup!(pipeline.set_state(gst::State::Playing))?;

        // Wait a brief moment for the pipeline to start playing
        let _ = pipeline.state(gst::ClockTime::from_mseconds(100));
        cleanup!(pipeline.state(gst::ClockTime::from_seconds(5)).0)?;

        let caps = cleanup!(pad.current_caps().ok_or(Error::Caps))?;
        let info = cleanup!(gst_video::VideoInfo::from_caps(&caps).map_err(|_| Error::Caps))?;
        let pixel_format = match info.format() {
            gst_video::VideoFormat::Rgba | gst_video::VideoFormat::Rgbx => PixelFormat::Rgba8,
            gst_video::VideoFormat::Bgra | gst_video::VideoFormat::Bgrx => PixelFormat::Bgra8,
            _ => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(Error::Caps);
            }
        };

        let fps = info.fps();
        let framerate = fps.numer() as f64 / fps.denom() as f64;
        if framerate.is_nan()
            || framerate.is_infinite()
            || framerate < 0.0
            || framerate.abs() < f64::EPSILON
        {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(Error::Framerate(framerate));
        }

        let duration = Duration::from_nanos(
            pipeline
                .query_duration::<gst::ClockTime>()
                .map(|duration| duration.nseconds())
                .unwrap_or(0),
        );

        let config = PipelineConfig::new(info.width(), info.height()).pixel_format(pixel_format);
        let frames = cleanup!(FramePipeline::new(config))?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_ref = Arc::clone(&alive);
        let resolution_changed = Arc::new(AtomicBool::new(false));
        let resolution_changed_ref = Arc::clone(&resolution_changed);
        let frames_ref = frames.clone();
        let pipeline_ref = pipeline.clone();

        let worker = std::thread::spawn(move || {
            let mut last_pts = None;

            while alive_ref.load(Ordering::Acquire) {
                // On timeout just continue (no frame this tick)
                let sample = if pipeline_ref.state(gst::ClockTime::ZERO).1 != gst::State::Playing {
                    video_sink.try_pull_preroll(gst::ClockTime::from_mseconds(16))
                } else {
                    video_sink.try_pull_sample(gst::ClockTime::from_mseconds(16))
                };
                let Some(sample) = sample else {
                    continue;
                };

                // While paused the preroll sample is handed out repeatedly.
                let pts = sample.buffer().and_then(|buffer| buffer.pts());
                if pts.is_some() && pts == last_pts {
                    continue;
                }
                last_pts = pts;

                if !handle_sample(&frames_ref, &sample, &resolution_changed_ref) {
                    break;
                }
            }
        });

        log::debug!(
            "video source {}x{} {:?} at {framerate:.2} fps",
            info.width(),
            info.height(),
            pixel_format
        );

        Ok(Self {
            source: pipeline,
            frames,
            alive,
            resolution_changed,
            worker: Some(worker),
            framerate,
            duration,
        })
    }

    /// The frame pipeline this source feeds.
    pub fn frames(&self) -> FramePipeline {
        self.frames.clone()
    }

    /// Get the size/resolution of the video as `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        self.frames.size()
    }

    /// Get the framerate of the video as frames per second.
    pub fn framerate(&self) -> f64 {
        self.framerate
    }

    /// Get the media duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Set if the media is paused or not.
    pub fn set_paused(&self, paused: bool) -> Result<(), Error> {
        self.source.set_state(if paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        })?;
        Ok(())
    }

    /// Get if the media is paused or not.
    pub fn paused(&self) -> bool {
        self.source.state(gst::ClockTime::ZERO).1 == gst::State::Paused
    }

    /// Jump to `position` and drop frames decoded before the jump.
    pub fn seek(&self, position: Duration, accurate: bool) -> Result<(), Error> {
        let flags = if accurate {
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE
        } else {
            gst::SeekFlags::FLUSH
        };
        self.source
            .seek_simple(flags, gst::ClockTime::from_nseconds(position.as_nanos() as u64))?;
        self.frames.clear()?;
        Ok(())
    }

    /// Get the current playback position in time.
    pub fn position(&self) -> Duration {
        Duration::from_nanos(
            self.source
                .query_position::<gst::ClockTime>()
                .map_or(0, |pos| pos.nseconds()),
        )
    }

    /// Whether decoding stopped because the stream changed resolution. The
    /// frame pipeline has a fixed size, so a new source has to be built.
    pub fn resolution_changed(&self) -> bool {
        self.resolution_changed.load(Ordering::Acquire)
    }

    /// Get the underlying GStreamer pipeline.
    pub fn pipeline(&self) -> gst::Pipeline {
        self.source.clone()
    }
}

/// Push one sample. Returns `false` when the worker should stop.
fn handle_sample(
    frames: &FramePipeline,
    sample: &gst::Sample,
    resolution_changed: &AtomicBool,
) -> bool {
    match push_sample(frames, sample) {
        Ok(_) => true,
        Err(Error::UseAfterDispose) => false,
        Err(Error::InvalidDimensions { width, height }) => {
            log::warn!(
                "stream switched to {width}x{height}, frame pipeline is {:?}; stopping decoder",
                frames.size()
            );
            resolution_changed.store(true, Ordering::Release);
            false
        }
        Err(err) => {
            log::error!("error processing frame: {err}");
            true
        }
    }
}

/// Copy one appsink sample row by row into a pooled buffer.
fn push_sample(frames: &FramePipeline, sample: &gst::Sample) -> Result<u64, Error> {
    let caps = sample.caps().ok_or(Error::Caps)?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| Error::Caps)?;
    if (info.width(), info.height()) != frames.size() {
        // A new resolution needs a new pipeline.
        return Err(Error::InvalidDimensions {
            width: info.width(),
            height: info.height(),
        });
    }

    let buffer = sample.buffer().ok_or(Error::Caps)?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)?;
    let src_stride = frame.plane_stride()[0] as usize;
    let plane = frame.plane_data(0)?;
    let row = frames.format().stride();
    let padded = matches!(
        info.format(),
        gst_video::VideoFormat::Rgbx | gst_video::VideoFormat::Bgrx
    );

    frames.push_with(|dst| copy_rows(plane, src_stride, dst, row, padded))
}

/// Copy `row`-byte rows out of a plane laid out with `src_stride`. With
/// `padded` set the fourth byte of every pixel is undefined and gets forced
/// to opaque.
fn copy_rows(
    plane: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    row: usize,
    padded: bool,
) -> Result<(), Error> {
    for (y, out) in dst.chunks_exact_mut(row).enumerate() {
        let start = y * src_stride;
        let src = plane.get(start..start + row).ok_or(Error::FrameSize {
            expected: start + row,
            actual: plane.len(),
        })?;
        out.copy_from_slice(src);
        if padded {
            for px in out.chunks_exact_mut(4) {
                px[3] = 0xff;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(
        format: gst_video::VideoFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> gst::Sample {
        let info = gst_video::VideoInfo::builder(format, width, height)
            .build()
            .unwrap();
        let caps = info.to_caps().unwrap();
        let buffer = gst::Buffer::from_mut_slice(data);
        gst::Sample::builder().buffer(&buffer).caps(&caps).build()
    }

    #[test]
    fn test_copy_rows_skips_stride_padding() {
        // Two 1-pixel rows, each followed by 4 bytes of row padding.
        let plane = [1, 2, 3, 4, 9, 9, 9, 9, 5, 6, 7, 8, 9, 9, 9, 9];
        let mut dst = [0u8; 8];
        copy_rows(&plane, 8, &mut dst, 4, false).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_rows_forces_opaque_alpha() {
        let plane = [10, 20, 30, 0, 40, 50, 60, 7];
        let mut dst = [0u8; 8];
        copy_rows(&plane, 8, &mut dst, 8, true).unwrap();
        assert_eq!(dst, [10, 20, 30, 0xff, 40, 50, 60, 0xff]);
    }

    #[test]
    fn test_copy_rows_short_plane() {
        let plane = [0u8; 6];
        let mut dst = [0u8; 8];
        assert!(matches!(
            copy_rows(&plane, 4, &mut dst, 4, false),
            Err(Error::FrameSize { expected: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_rgbx_sample_is_opaque() {
        gst::init().unwrap();
        let frames = FramePipeline::new(PipelineConfig::new(2, 2)).unwrap();
        let data = [7, 7, 7, 0].repeat(4);
        push_sample(&frames, &sample(gst_video::VideoFormat::Rgbx, 2, 2, data)).unwrap();

        let frame = frames.get_frame().unwrap();
        let pixels = frame.lock_pixels().unwrap();
        assert!(pixels.chunks_exact(4).all(|px| px == [7, 7, 7, 0xff]));
    }

    #[test]
    fn test_resolution_change_stops_worker() {
        gst::init().unwrap();
        let frames = FramePipeline::new(PipelineConfig::new(2, 2)).unwrap();
        let changed = AtomicBool::new(false);

        let same = sample(gst_video::VideoFormat::Rgba, 2, 2, vec![0; 16]);
        assert!(handle_sample(&frames, &same, &changed));
        assert!(!changed.load(Ordering::Acquire));

        let larger = sample(gst_video::VideoFormat::Rgba, 4, 2, vec![0; 32]);
        assert!(!handle_sample(&frames, &larger, &changed));
        assert!(changed.load(Ordering::Acquire));
        assert_eq!(frames.queued(), 1);
    }

    #[test]
    fn test_disposed_pipeline_stops_worker() {
        gst::init().unwrap();
        let frames = FramePipeline::new(PipelineConfig::new(2, 2)).unwrap();
        frames.dispose().unwrap();
        let changed = AtomicBool::new(false);
        let same = sample(gst_video::VideoFormat::Rgba, 2, 2, vec![0; 16]);
        assert!(!handle_sample(&frames, &same, &changed));
        assert!(!changed.load(Ordering::Acquire));
    }
}
