//! # Video Frame Pipeline
//!
//! A pooled frame buffer pipeline between a video decoder thread and a render
//! surface.
//!
//! ## Features
//!
//! - Reusable RGBA/BGRA pixel buffers; no per-frame heap allocation once warm
//! - Producer never blocks: the pool grows on demand
//! - FIFO hand-off with a still-image rule (a lone queued frame is redrawn,
//!   not consumed)
//! - Deferred disposal: buffers still referenced by a retained draw are
//!   released only when that draw completes
//! - Optional NV12 input, converted while the buffer is filled
//! - Optional GStreamer decoder (`gstreamer` feature) and gpui element
//!   (`gpui` feature)
//!
//! ## Example
//!
//! ```rust
//! use video_frame_pipeline::{
//!     DrawLease, FramePipeline, FrameView, PipelineConfig, Presented, RenderBackend,
//!     RenderConsumer, Retention, Transform,
//! };
//!
//! struct Blit;
//!
//! impl RenderBackend for Blit {
//!     fn draw_frame(&mut self, frame: &FrameView<'_>, _: &Transform, _: Option<DrawLease>) {
//!         assert_eq!(frame.pixels.len(), 16 * 16 * 4);
//!     }
//!     fn draw_placeholder(&mut self, _: &Transform) {}
//! }
//!
//! let pipeline = FramePipeline::new(PipelineConfig::new(16, 16)).unwrap();
//! let mut consumer = RenderConsumer::new(pipeline.clone(), Retention::Immediate).unwrap();
//!
//! // Decoder thread
//! pipeline.push_frame(&[0xff; 16 * 16 * 4]).unwrap();
//!
//! // Render thread
//! let presented = consumer.draw(&mut Blit, &Transform::identity()).unwrap();
//! assert!(matches!(presented, Presented::Frame { sequence: 1, .. }));
//! ```

mod buffer;
mod config;
mod consumer;
mod error;
mod format;
mod pipeline;
mod pool;
mod queue;
mod transform;

#[cfg(feature = "gpui")]
mod element;
#[cfg(feature = "gstreamer")]
mod source;

pub use buffer::{BufferState, DrawLease, FrameBuffer, FrameView};
pub use config::{DEFAULT_PREALLOCATED, PipelineConfig};
pub use consumer::{Presented, RenderBackend, RenderConsumer, Retention};
pub use error::Error;
pub use format::{BYTES_PER_PIXEL, FrameFormat, PixelFormat, SourceFormat, YuvMatrix};
pub use pipeline::{FramePipeline, FrameReadyCallback};
pub use pool::{BufferPool, PoolStats};
pub use queue::{DrainPolicy, PipelineQueue};
pub use transform::{ContentFit, Transform};

#[cfg(feature = "gpui")]
pub use element::{FrameElement, FrameSurface, frame_element};
#[cfg(feature = "gstreamer")]
pub use source::VideoSource;

// Re-export commonly used types
#[cfg(feature = "gstreamer")]
pub use gstreamer as gst;
#[cfg(feature = "gstreamer")]
pub use url::Url;
