use crate::Error;
use crate::buffer::{BufferState, FrameBuffer};
use crate::config::PipelineConfig;
use crate::format::{FrameFormat, PixelFormat, SourceFormat};
use crate::pool::{BufferPool, PoolStats};
use crate::queue::{DrainPolicy, PipelineQueue};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use yuv::{YuvBiPlanarImage, YuvConversionMode, YuvRange};

/// Invalidate hook called on the producer thread after each enqueue.
pub type FrameReadyCallback = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    config: PipelineConfig,
    format: FrameFormat,
    pool: BufferPool,
    queue: PipelineQueue<Arc<FrameBuffer>>,
    /// `true` once disposed. Enqueue holds the read side so a frame can never
    /// land in the queue after teardown drained it.
    disposed: RwLock<bool>,
    next_sequence: AtomicU64,
    frame_ready: AtomicBool,
    on_frame_ready: RwLock<Option<FrameReadyCallback>>,
}

/// Decode-side buffer pool plus the queue of frames waiting to be shown.
///
/// The handle is cheap to clone: the decoder thread pushes frames through one
/// clone while the render thread consumes them through another.
#[derive(Clone)]
pub struct FramePipeline(Arc<Shared>);

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("config", &self.0.config)
            .field("queued", &self.0.queue.len())
            .field("pool", &self.0.pool)
            .finish()
    }
}

impl FramePipeline {
    /// Build a pipeline with fixed dimensions and formats.
    pub fn new(config: PipelineConfig) -> Result<Self, Error> {
        let format = config.frame_format()?;
        let pool = BufferPool::new(format, config.preallocated(), config.is_deferred_disposal())?;
        Ok(Self(Arc::new(Shared {
            config,
            format,
            pool,
            queue: PipelineQueue::new(),
            disposed: RwLock::new(false),
            next_sequence: AtomicU64::new(0),
            frame_ready: AtomicBool::new(false),
            on_frame_ready: RwLock::new(None),
        })))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.0.config
    }

    pub fn format(&self) -> FrameFormat {
        self.0.format
    }

    /// Get the frame size as `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.0.format.width(), self.0.format.height())
    }

    /// Bytes the decoder must hand over per frame.
    pub fn source_len(&self) -> usize {
        self.0.format.source_len(self.0.config.source_format())
    }

    /// Register the invalidate hook, replacing any previous one.
    pub fn on_frame_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.0.on_frame_ready.write() = Some(Arc::new(callback));
    }

    /// Check for a new frame since the last call (consumes the flag).
    pub fn take_frame_ready(&self) -> bool {
        self.0.frame_ready.swap(false, Ordering::SeqCst)
    }

    /// Check out a buffer for the producer to fill.
    pub fn acquire(&self) -> Result<Arc<FrameBuffer>, Error> {
        self.0.pool.acquire()
    }

    /// Queue a filled buffer for display and return its sequence number.
    ///
    /// After dispose the buffer is released and the call fails with
    /// [`Error::UseAfterDispose`].
    pub fn enqueue(&self, buffer: Arc<FrameBuffer>) -> Result<u64, Error> {
        self.0.pool.check_owner(&buffer)?;
        let disposed = self.0.disposed.read();
        if *disposed {
            self.0.pool.recycle(buffer)?;
            return Err(Error::UseAfterDispose);
        }

        let sequence = {
            let mut slot = buffer.slot();
            if slot.state != BufferState::Rendering {
                return Err(Error::NotAcquired(buffer.id()));
            }
            slot.sequence = self.0.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
            slot.sequence
        };
        self.0.queue.enqueue(buffer);
        drop(disposed);

        self.0.frame_ready.store(true, Ordering::SeqCst);
        let callback = self.0.on_frame_ready.read().clone();
        if let Some(callback) = callback {
            callback();
        }
        Ok(sequence)
    }

    /// Acquire a buffer, let `fill` write the pixels in place, and enqueue it.
    /// A failed fill returns the buffer to the pool.
    pub fn push_with<F>(&self, fill: F) -> Result<u64, Error>
    where
        F: FnOnce(&mut [u8]) -> Result<(), Error>,
    {
        let buffer = self.acquire()?;
        let filled = match buffer.lock_pixels() {
            Some(mut pixels) => fill(&mut *pixels),
            None => Err(Error::UseAfterDispose),
        };
        if let Err(err) = filled {
            self.0.pool.recycle(buffer)?;
            return Err(err);
        }
        self.enqueue(buffer)
    }

    /// Copy one decoded frame into a pooled buffer and queue it.
    ///
    /// `src` must be exactly [`source_len`](Self::source_len) bytes. The copy
    /// is complete when this returns, so the decoder may reuse `src`.
    pub fn push_frame(&self, src: &[u8]) -> Result<u64, Error> {
        let expected = self.source_len();
        if src.len() != expected {
            return Err(Error::FrameSize {
                expected,
                actual: src.len(),
            });
        }
        let format = self.0.format;
        let source = self.0.config.source_format();
        self.push_with(|dst| fill_from_source(format, source, src, dst))
    }

    /// [`push_frame`](Self::push_frame) for decoders that hand over a raw
    /// address and byte count.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `len` bytes for the duration of the
    /// call and must not be written to concurrently.
    pub unsafe fn push_frame_raw(&self, data: *const u8, len: usize) -> Result<u64, Error> {
        if data.is_null() {
            return Err(Error::FrameSize {
                expected: self.source_len(),
                actual: 0,
            });
        }
        let src = unsafe { std::slice::from_raw_parts(data, len) };
        self.push_frame(src)
    }

    /// Peek the oldest queued frame.
    pub fn get_frame(&self) -> Option<Arc<FrameBuffer>> {
        if self.is_disposed() {
            return None;
        }
        self.0.queue.peek()
    }

    /// Return a frame taken off the queue.
    pub fn recycle_frame(&self, buffer: Arc<FrameBuffer>) -> Result<(), Error> {
        self.0.pool.recycle(buffer)
    }

    /// Dequeue the oldest frame if `policy` allows it at the current depth.
    pub fn try_advance(&self, policy: DrainPolicy) -> Option<Arc<FrameBuffer>> {
        self.0.queue.try_advance(policy)
    }

    /// Frames waiting to be shown.
    pub fn queued(&self) -> usize {
        self.0.queue.len()
    }

    /// Discard every queued frame, e.g. after a seek. Returns how many.
    pub fn clear(&self) -> Result<usize, Error> {
        let stale = self.0.queue.drain();
        let count = stale.len();
        for buffer in stale {
            self.0.pool.recycle(buffer)?;
        }
        if count > 0 {
            log::debug!("discarded {count} queued frames");
        }
        Ok(count)
    }

    /// Tear the pipeline down: dispose the pool, then release queued frames.
    pub fn dispose(&self) -> Result<(), Error> {
        let mut disposed = self.0.disposed.write();
        if *disposed {
            return Err(Error::AlreadyDisposed);
        }
        *disposed = true;
        self.0.pool.dispose()?;
        for buffer in self.0.queue.drain() {
            self.0.pool.recycle(buffer)?;
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        *self.0.disposed.read()
    }

    pub fn stats(&self) -> PoolStats {
        self.0.pool.stats()
    }
}

fn fill_from_source(
    format: FrameFormat,
    source: SourceFormat,
    src: &[u8],
    dst: &mut [u8],
) -> Result<(), Error> {
    match source {
        SourceFormat::Packed => {
            dst.copy_from_slice(src);
            Ok(())
        }
        SourceFormat::Nv12 { matrix } => {
            let (width, height) = (format.width(), format.height());
            let y_size = width as usize * height as usize;
            let (y_plane, uv_plane) = src.split_at(y_size);
            let image = YuvBiPlanarImage {
                y_plane,
                y_stride: width,
                uv_plane,
                uv_stride: width,
                width,
                height,
            };
            let stride = format.stride() as u32;
            let converted = match format.pixel_format() {
                PixelFormat::Rgba8 => yuv::yuv_nv12_to_rgba(
                    &image,
                    dst,
                    stride,
                    YuvRange::Limited,
                    matrix.into(),
                    YuvConversionMode::Balanced,
                ),
                PixelFormat::Bgra8 => yuv::yuv_nv12_to_bgra(
                    &image,
                    dst,
                    stride,
                    YuvRange::Limited,
                    matrix.into(),
                    YuvConversionMode::Balanced,
                ),
            };
            converted.map_err(|err| Error::Conversion(format!("{err:?}")))
        }
    }
}
