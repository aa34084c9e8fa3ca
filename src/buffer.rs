use crate::format::{FrameFormat, PixelFormat};
use crate::pool::{Counters, PoolShared};
use image::RgbaImage;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Lifecycle state of a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Sitting in the pool's free list.
    Free,
    /// Handed to the producer, queued, or on screen.
    Rendering,
    /// The pool was torn down while the buffer was still referenced. Storage
    /// is released when the last reference clears.
    PendingDispose,
    /// Pixel storage has been released.
    Destroyed,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) state: BufferState,
    pub(crate) pixels: Option<Box<[u8]>>,
    pub(crate) sequence: u64,
}

/// A fixed-size pixel buffer owned by a [`BufferPool`](crate::BufferPool).
///
/// Buffers travel as `Arc<FrameBuffer>`. Who may use one is tracked with an
/// explicit reference count: `acquire` hands out the owner token, every
/// [`DrawLease`] adds one, and the storage is returned to the pool or
/// released once the count drops to zero.
pub struct FrameBuffer {
    id: u64,
    pool_id: u64,
    format: FrameFormat,
    deferred_disposal: bool,
    refs: AtomicUsize,
    slot: Mutex<Slot>,
    pool: Weak<PoolShared>,
    counters: Arc<Counters>,
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("format", &self.format)
            .field("deferred_disposal", &self.deferred_disposal)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FrameBuffer {
    pub(crate) fn new(
        id: u64,
        pool_id: u64,
        format: FrameFormat,
        deferred_disposal: bool,
        pixels: Box<[u8]>,
        pool: Weak<PoolShared>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            pool_id,
            format,
            deferred_disposal,
            refs: AtomicUsize::new(0),
            slot: Mutex::new(Slot {
                state: BufferState::Free,
                pixels: Some(pixels),
                sequence: 0,
            }),
            pool,
            counters,
        }
    }

    /// Debug identifier, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Whether teardown parks this buffer as `PendingDispose` while it is
    /// still referenced, and whether draws may lease it.
    pub fn is_deferred_disposal(&self) -> bool {
        self.deferred_disposal
    }

    pub fn state(&self) -> BufferState {
        self.slot.lock().state
    }

    /// Sequence number stamped when the buffer was last enqueued, 0 if never.
    pub fn sequence(&self) -> u64 {
        self.slot.lock().sequence
    }

    /// Lock the pixel storage. Returns `None` once the buffer is destroyed.
    ///
    /// Do not hold the guard across calls into the pool.
    pub fn lock_pixels(&self) -> Option<MappedMutexGuard<'_, [u8]>> {
        MutexGuard::try_map(self.slot.lock(), |slot| slot.pixels.as_deref_mut()).ok()
    }

    /// Take a draw lease for a backend that keeps referencing the buffer after
    /// the draw call returns. Only deferred-disposal buffers that are checked
    /// out can be leased.
    pub fn lease(self: &Arc<Self>) -> Option<DrawLease> {
        if !self.deferred_disposal {
            return None;
        }
        let slot = self.slot.lock();
        if slot.state != BufferState::Rendering {
            return None;
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        Some(DrawLease {
            buffer: Arc::clone(self),
        })
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub(crate) fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Hand the buffer out with a single owner token. Caller holds the pool lock.
    pub(crate) fn check_out(&self, slot: &mut Slot) {
        slot.state = BufferState::Rendering;
        slot.sequence = 0;
        self.refs.store(1, Ordering::Release);
    }

    /// Drop one token. Returns `true` if it was the last one.
    pub(crate) fn release_ref(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            == Ok(1)
    }

    /// Release the pixel storage. Returns `false` if that already happened.
    pub(crate) fn destroy(&self, slot: &mut Slot) -> bool {
        if slot.state == BufferState::Destroyed {
            return false;
        }
        let bytes = slot.pixels.take().map_or(0, |pixels| pixels.len());
        slot.state = BufferState::Destroyed;
        self.counters.record_destroyed();
        log::trace!("frame buffer #{} released ({} bytes)", self.id, bytes);
        true
    }

    /// Route a buffer whose last token just cleared back to its pool, or
    /// release it if the pool is gone.
    fn settle(self: &Arc<Self>) {
        match self.pool.upgrade() {
            Some(pool) => pool.settle(self),
            None => {
                let mut slot = self.slot.lock();
                self.destroy(&mut slot);
            }
        }
    }
}

/// A reference held by a render backend whose draw retains the buffer past
/// the call that submitted it. Dropping the lease signals that the draw
/// completed.
#[derive(Debug)]
pub struct DrawLease {
    buffer: Arc<FrameBuffer>,
}

impl DrawLease {
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }
}

impl Drop for DrawLease {
    fn drop(&mut self) {
        if self.buffer.release_ref() {
            log::trace!("draw completed on frame buffer #{}", self.buffer.id);
            self.buffer.settle();
        }
    }
}

/// Borrowed pixels of a display surface, handed to a render backend.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub id: u64,
    pub sequence: u64,
    pub format: FrameFormat,
    pub pixels: &'a [u8],
}

impl FrameView<'_> {
    /// Copy the frame into an RGBA image, swizzling BGRA input.
    pub fn to_image(&self) -> Option<RgbaImage> {
        let mut data = self.pixels.to_vec();
        if self.format.pixel_format() == PixelFormat::Bgra8 {
            for px in data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        RgbaImage::from_raw(self.format.width(), self.format.height(), data)
    }
}
