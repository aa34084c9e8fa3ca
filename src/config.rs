use crate::Error;
use crate::format::{FrameFormat, PixelFormat, SourceFormat};
use crate::queue::DrainPolicy;

/// Buffers allocated up front by a new pool.
pub const DEFAULT_PREALLOCATED: usize = 2;

/// Fixed configuration of a [`FramePipeline`](crate::FramePipeline).
///
/// Dimensions and formats are immutable once the pipeline is built. A
/// dimension change means building a new pipeline and disposing the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    source: SourceFormat,
    preallocate: usize,
    deferred_disposal: bool,
    drain_policy: DrainPolicy,
}

impl PipelineConfig {
    /// Create a configuration for `width`x`height` RGBA frames copied as-is.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::default(),
            source: SourceFormat::default(),
            preallocate: DEFAULT_PREALLOCATED,
            deferred_disposal: true,
            drain_policy: DrainPolicy::default(),
        }
    }

    /// Set the layout of the pooled buffers.
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Set what the decoder pushes.
    pub fn source(mut self, source: SourceFormat) -> Self {
        self.source = source;
        self
    }

    /// Set how many buffers the pool allocates up front.
    pub fn preallocate(mut self, count: usize) -> Self {
        self.preallocate = count;
        self
    }

    /// Set whether buffers still checked out at teardown are parked as
    /// `PendingDispose` instead of being released on the spot.
    pub fn deferred_disposal(mut self, deferred: bool) -> Self {
        self.deferred_disposal = deferred;
        self
    }

    /// Set when the consumer advances the queue.
    pub fn drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source
    }

    pub fn preallocated(&self) -> usize {
        self.preallocate
    }

    pub fn is_deferred_disposal(&self) -> bool {
        self.deferred_disposal
    }

    pub fn policy(&self) -> DrainPolicy {
        self.drain_policy
    }

    pub(crate) fn frame_format(&self) -> Result<FrameFormat, Error> {
        let format = FrameFormat::new(self.width, self.height, self.pixel_format)?;
        // NV12 chroma rows are read with a stride equal to the width.
        if matches!(self.source, SourceFormat::Nv12 { .. }) && self.width % 2 != 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(format)
    }
}
