use crate::Error;
use crate::buffer::{BufferState, DrawLease, FrameBuffer, FrameView};
use crate::pipeline::FramePipeline;
use crate::pool::{BufferPool, PoolStats};
use crate::queue::DrainPolicy;
use crate::transform::Transform;
use std::sync::Arc;

/// Whether the graphics backend keeps referencing a surface after the call
/// that submitted the draw returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Retention {
    /// The draw is complete when `draw_frame` returns.
    #[default]
    Immediate,
    /// The backend holds the [`DrawLease`] until its retained draw completes.
    Deferred,
}

/// The render surface the consumer presents to.
pub trait RenderBackend {
    /// Draw a display-ready frame. With [`Retention::Deferred`] the backend
    /// receives a lease and must drop it once the draw has completed; the
    /// surface is not reused before that.
    fn draw_frame(
        &mut self,
        frame: &FrameView<'_>,
        transform: &Transform,
        lease: Option<DrawLease>,
    );

    /// Draw the transparent placeholder shown before the first frame and
    /// after teardown.
    fn draw_placeholder(&mut self, transform: &Transform);
}

/// Outcome of one [`RenderConsumer::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presented {
    Placeholder,
    Frame {
        /// Sequence number of the decoded frame shown.
        sequence: u64,
        /// Id of the display surface it was copied into.
        surface: u64,
    },
}

#[derive(Debug)]
struct Current {
    surface: Arc<FrameBuffer>,
    sequence: u64,
}

/// Draw-time side of the pipeline. Lives on the render thread.
///
/// Each draw copies the oldest queued frame into a display surface taken
/// from the consumer's own pool, presents it, then advances the queue as the
/// drain policy allows. It never blocks waiting for a frame.
#[derive(Debug)]
pub struct RenderConsumer {
    pipeline: FramePipeline,
    surfaces: BufferPool,
    retention: Retention,
    policy: DrainPolicy,
    current: Option<Current>,
    disposed: bool,
}

impl RenderConsumer {
    /// Create a consumer for `pipeline` whose backend retains draws as
    /// described by `retention`.
    pub fn new(pipeline: FramePipeline, retention: Retention) -> Result<Self, Error> {
        let surfaces = BufferPool::new(
            pipeline.format(),
            pipeline.config().preallocated(),
            retention == Retention::Deferred,
        )?;
        Ok(Self {
            policy: pipeline.config().policy(),
            pipeline,
            surfaces,
            retention,
            current: None,
            disposed: false,
        })
    }

    /// Override the drain policy taken from the pipeline configuration.
    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// The display surface currently on screen, if any.
    pub fn current_surface(&self) -> Option<Arc<FrameBuffer>> {
        self.current.as_ref().map(|current| Arc::clone(&current.surface))
    }

    pub fn surface_stats(&self) -> PoolStats {
        self.surfaces.stats()
    }

    /// Present the most recent frame, or the placeholder if there is none.
    pub fn draw<B>(&mut self, backend: &mut B, transform: &Transform) -> Result<Presented, Error>
    where
        B: RenderBackend + ?Sized,
    {
        if self.disposed || self.pipeline.is_disposed() {
            backend.draw_placeholder(transform);
            return Ok(Presented::Placeholder);
        }

        if let Some(frame) = self.pipeline.get_frame() {
            self.upload(&frame)?;
        }

        let presented = self.present(backend, transform);

        if let Some(done) = self.pipeline.try_advance(self.policy) {
            self.pipeline.recycle_frame(done)?;
        }
        Ok(presented)
    }

    /// Copy `frame` into a free display surface and make it current, unless
    /// it is already on screen.
    fn upload(&mut self, frame: &FrameBuffer) -> Result<(), Error> {
        // Sequence and pixels are read under one lock so a buffer recycled
        // and refilled after the peek is never shown under a stale number.
        let slot = frame.slot();
        let (BufferState::Rendering, Some(src)) = (slot.state, slot.pixels.as_deref()) else {
            // Released by a concurrent clear or teardown.
            return Ok(());
        };
        let sequence = slot.sequence;
        if sequence == 0 {
            // Checked out again but not enqueued yet.
            return Ok(());
        }
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.sequence == sequence)
        {
            return Ok(());
        }

        let surface = self.surfaces.acquire()?;
        let copied = match surface.lock_pixels() {
            Some(mut dst) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        };
        drop(slot);
        if !copied {
            return self.surfaces.recycle(surface);
        }

        if let Some(previous) = self.current.replace(Current { surface, sequence }) {
            self.surfaces.recycle(previous.surface)?;
        }
        Ok(())
    }

    fn present<B>(&self, backend: &mut B, transform: &Transform) -> Presented
    where
        B: RenderBackend + ?Sized,
    {
        let Some(current) = &self.current else {
            backend.draw_placeholder(transform);
            return Presented::Placeholder;
        };

        let lease = match self.retention {
            Retention::Deferred => current.surface.lease(),
            Retention::Immediate => None,
        };
        let Some(pixels) = current.surface.lock_pixels() else {
            backend.draw_placeholder(transform);
            return Presented::Placeholder;
        };
        let view = FrameView {
            id: current.surface.id(),
            sequence: current.sequence,
            format: current.surface.format(),
            pixels: &pixels,
        };
        backend.draw_frame(&view, transform, lease);

        Presented::Frame {
            sequence: current.sequence,
            surface: current.surface.id(),
        }
    }

    /// Release the current surface and tear down the display pool. Surfaces
    /// still leased by the backend are released when their draw completes.
    pub fn dispose(&mut self) -> Result<(), Error> {
        if self.disposed {
            return Err(Error::AlreadyDisposed);
        }
        self.disposed = true;
        if let Some(current) = self.current.take() {
            self.surfaces.recycle(current.surface)?;
        }
        self.surfaces.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for RenderConsumer {
    fn drop(&mut self) {
        if !self.disposed {
            if let Err(err) = self.dispose() {
                log::warn!("failed to dispose render consumer: {err}");
            }
        }
    }
}
