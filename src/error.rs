#[cfg(feature = "gstreamer")]
use gstreamer as gst;

/// Errors surfaced by the frame pipeline.
///
/// Pool and queue errors signal a violated invariant upstream and are never
/// retried internally. An empty queue or an exhausted free list is not an
/// error; those are handled by rendering a placeholder or allocating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `dispose` was called on a pool or consumer that was already torn down.
    #[error("already disposed")]
    AlreadyDisposed,
    /// The pixel storage for a new buffer could not be reserved.
    #[error("failed to allocate a {bytes} byte frame buffer")]
    Allocation { bytes: usize },
    /// A buffer was requested from, or handed to, a disposed pipeline.
    #[error("frame pool used after dispose")]
    UseAfterDispose,
    /// Frame dimensions are zero, overflow, or do not suit the source format.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    /// The decoder handed over a frame with the wrong byte count.
    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },
    /// The buffer was allocated by a different pool.
    #[error("frame buffer #{0} does not belong to this pool")]
    ForeignBuffer(u64),
    /// The buffer is sitting in the free list and was not checked out.
    #[error("frame buffer #{0} is not checked out")]
    NotAcquired(u64),
    /// Source pixels could not be converted into the pipeline format.
    #[error("pixel conversion failed: {0}")]
    Conversion(String),
    #[cfg(feature = "gstreamer")]
    #[error("{0}")]
    Glib(#[from] glib::Error),
    #[cfg(feature = "gstreamer")]
    #[error("{0}")]
    Bool(#[from] glib::BoolError),
    #[cfg(feature = "gstreamer")]
    #[error("failed to change pipeline state: {0}")]
    StateChange(#[from] gst::StateChangeError),
    #[cfg(feature = "gstreamer")]
    #[error("failed to cast gstreamer element")]
    Cast,
    #[cfg(feature = "gstreamer")]
    #[error("failed to read video caps")]
    Caps,
    #[cfg(feature = "gstreamer")]
    #[error("invalid framerate: {0}")]
    Framerate(f64),
}
