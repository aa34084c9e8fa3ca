use crate::Error;
use crate::buffer::{BufferState, FrameBuffer};
use crate::format::FrameFormat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifetime counters of a pool. Buffers keep a handle so destruction is
/// counted even after the pool itself is gone.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    allocated: AtomicU64,
    destroyed: AtomicU64,
    acquired: AtomicU64,
    reused: AtomicU64,
}

impl Counters {
    pub(crate) fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers currently tracked by the pool (0 after dispose).
    pub total_buffers: usize,
    pub free_buffers: usize,
    /// Buffers ever allocated.
    pub allocated: u64,
    /// Buffers whose storage has been released.
    pub destroyed: u64,
    pub acquired: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    all: Vec<Arc<FrameBuffer>>,
    free: Vec<Arc<FrameBuffer>>,
    disposed: bool,
}

pub(crate) struct PoolShared {
    id: u64,
    format: FrameFormat,
    deferred_disposal: bool,
    state: Mutex<PoolState>,
    counters: Arc<Counters>,
}

impl PoolShared {
    /// Finish a buffer whose last token cleared: back to the free list while
    /// the pool is live, released otherwise.
    pub(crate) fn settle(&self, buffer: &Arc<FrameBuffer>) {
        let mut state = self.state.lock();
        let mut slot = buffer.slot();
        if buffer.outstanding() != 0 {
            return;
        }
        match slot.state {
            BufferState::Rendering if !state.disposed => {
                slot.state = BufferState::Free;
                state.free.push(Arc::clone(buffer));
            }
            BufferState::Rendering | BufferState::PendingDispose => {
                if buffer.destroy(&mut slot) {
                    log::debug!("deferred release of frame buffer #{}", buffer.id());
                }
            }
            BufferState::Free | BufferState::Destroyed => {}
        }
    }

    /// Tear down under the pool lock. Returns `(destroyed, pending)`.
    fn teardown(&self, state: &mut PoolState) -> (usize, usize) {
        state.disposed = true;
        state.free.clear();
        let (mut destroyed, mut pending) = (0, 0);
        for buffer in std::mem::take(&mut state.all) {
            let mut slot = buffer.slot();
            match slot.state {
                BufferState::Rendering if buffer.is_deferred_disposal() => {
                    slot.state = BufferState::PendingDispose;
                    pending += 1;
                }
                _ => {
                    if buffer.destroy(&mut slot) {
                        destroyed += 1;
                    }
                }
            }
        }
        (destroyed, pending)
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        if !state.disposed {
            let (destroyed, pending) = self.teardown(&mut state);
            log::debug!(
                "frame pool #{} dropped without dispose: {destroyed} released, {pending} pending",
                self.id
            );
        }
    }
}

/// A growable pool of equally sized [`FrameBuffer`]s.
///
/// `acquire` never blocks: it reuses a free buffer or allocates a new one.
/// Every method takes the pool-wide lock; mutations happen a few times per
/// frame at most.
#[derive(Clone)]
pub struct BufferPool(Arc<PoolShared>);

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.0.id)
            .field("format", &self.0.format)
            .field("stats", &self.stats())
            .finish()
    }
}

fn allocate_pixels(bytes: usize) -> Result<Box<[u8]>, Error> {
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(bytes)
        .map_err(|_| Error::Allocation { bytes })?;
    pixels.resize(bytes, 0);
    Ok(pixels.into_boxed_slice())
}

impl BufferPool {
    /// Create a pool of `format` buffers with `preallocate` of them ready.
    pub fn new(
        format: FrameFormat,
        preallocate: usize,
        deferred_disposal: bool,
    ) -> Result<Self, Error> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let storage = (0..preallocate)
            .map(|_| allocate_pixels(format.size_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let counters = Arc::new(Counters::default());
        counters
            .allocated
            .fetch_add(preallocate as u64, Ordering::Relaxed);

        let shared = Arc::new_cyclic(|weak: &Weak<PoolShared>| {
            let all: Vec<_> = storage
                .into_iter()
                .map(|pixels| {
                    Arc::new(FrameBuffer::new(
                        NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                        id,
                        format,
                        deferred_disposal,
                        pixels,
                        weak.clone(),
                        Arc::clone(&counters),
                    ))
                })
                .collect();
            PoolShared {
                id,
                format,
                deferred_disposal,
                state: Mutex::new(PoolState {
                    free: all.clone(),
                    all,
                    disposed: false,
                }),
                counters,
            }
        });

        log::debug!(
            "frame pool #{id}: {}x{} {:?}, {preallocate} buffers preallocated",
            format.width(),
            format.height(),
            format.pixel_format()
        );
        Ok(Self(shared))
    }

    pub fn format(&self) -> FrameFormat {
        self.0.format
    }

    /// Check out a buffer, reusing a free one when available.
    ///
    /// Fails with [`Error::UseAfterDispose`] once the pool is torn down and
    /// with [`Error::Allocation`] if a new buffer cannot be reserved.
    pub fn acquire(&self) -> Result<Arc<FrameBuffer>, Error> {
        let mut state = self.0.state.lock();
        if state.disposed {
            return Err(Error::UseAfterDispose);
        }

        let buffer = match state.free.pop() {
            Some(buffer) => {
                self.0.counters.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                let buffer = self.allocate()?;
                state.all.push(Arc::clone(&buffer));
                log::trace!(
                    "frame pool #{} grew to {} buffers",
                    self.0.id,
                    state.all.len()
                );
                buffer
            }
        };

        buffer.check_out(&mut buffer.slot());
        self.0.counters.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn allocate(&self) -> Result<Arc<FrameBuffer>, Error> {
        let pixels = allocate_pixels(self.0.format.size_bytes())?;
        self.0.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(FrameBuffer::new(
            NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            self.0.id,
            self.0.format,
            self.0.deferred_disposal,
            pixels,
            Arc::downgrade(&self.0),
            Arc::clone(&self.0.counters),
        )))
    }

    pub(crate) fn check_owner(&self, buffer: &FrameBuffer) -> Result<(), Error> {
        if buffer.pool_id() != self.0.id {
            return Err(Error::ForeignBuffer(buffer.id()));
        }
        Ok(())
    }

    /// Return a checked-out buffer.
    ///
    /// While the pool is live the buffer goes back to the free list; once the
    /// pool is disposed it is released instead. Outstanding draw leases delay
    /// either outcome until the last one is dropped.
    pub fn recycle(&self, buffer: Arc<FrameBuffer>) -> Result<(), Error> {
        self.check_owner(&buffer)?;
        match buffer.state() {
            BufferState::Free => return Err(Error::NotAcquired(buffer.id())),
            BufferState::Destroyed => return Ok(()),
            BufferState::Rendering | BufferState::PendingDispose => {}
        }
        if buffer.release_ref() {
            self.0.settle(&buffer);
        }
        Ok(())
    }

    /// Tear the pool down. Buffers still checked out are parked as
    /// `PendingDispose` if they take part in deferred disposal; everything
    /// else is released before this returns.
    pub fn dispose(&self) -> Result<(), Error> {
        let mut state = self.0.state.lock();
        if state.disposed {
            return Err(Error::AlreadyDisposed);
        }
        let (destroyed, pending) = self.0.teardown(&mut state);
        log::debug!(
            "frame pool #{} disposed: {destroyed} released, {pending} pending",
            self.0.id
        );
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.0.state.lock().disposed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.0.state.lock();
        let counters = &self.0.counters;
        PoolStats {
            total_buffers: state.all.len(),
            free_buffers: state.free.len(),
            allocated: counters.allocated.load(Ordering::Relaxed),
            destroyed: counters.destroyed.load(Ordering::Relaxed),
            acquired: counters.acquired.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn pool(preallocate: usize, deferred: bool) -> BufferPool {
        let format = FrameFormat::new(64, 64, PixelFormat::Rgba8).unwrap();
        BufferPool::new(format, preallocate, deferred).unwrap()
    }

    #[test]
    fn test_preallocated_buffers_are_free() {
        let pool = pool(2, true);
        let stats = pool.stats();
        assert_eq!(stats.total_buffers, 2);
        assert_eq!(stats.free_buffers, 2);
        assert_eq!(stats.allocated, 2);
    }

    #[test]
    fn test_grows_without_recycling() {
        let pool = pool(2, true);
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        let stats = pool.stats();
        assert_eq!(stats.total_buffers, 3);
        assert_eq!(stats.free_buffers, 0);
        assert!(held.iter().all(|b| b.state() == BufferState::Rendering));
        assert_eq!(held[0].lock_pixels().unwrap().len(), 64 * 64 * 4);
    }

    #[test]
    fn test_growth_under_backlog() {
        let pool = pool(2, true);
        let held: Vec<_> = (0..50).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.stats().total_buffers >= held.len());
    }

    #[test]
    fn test_recycle_reuses_buffer() {
        let pool = pool(0, true);
        let first = pool.acquire().unwrap();
        let id = first.id();
        pool.recycle(first).unwrap();

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), id);
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_double_recycle_is_rejected() {
        let pool = pool(1, true);
        let buffer = pool.acquire().unwrap();
        pool.recycle(Arc::clone(&buffer)).unwrap();
        assert!(matches!(pool.recycle(buffer), Err(Error::NotAcquired(_))));
    }

    #[test]
    fn test_foreign_buffer_is_rejected() {
        let a = pool(1, true);
        let b = pool(1, true);
        let buffer = a.acquire().unwrap();
        assert!(matches!(b.recycle(buffer), Err(Error::ForeignBuffer(_))));
    }

    #[test]
    fn test_dispose_parks_rendering_buffers() {
        let pool = pool(2, true);
        let rendering = pool.acquire().unwrap();
        pool.dispose().unwrap();

        assert_eq!(rendering.state(), BufferState::PendingDispose);
        assert!(rendering.lock_pixels().is_some());
        // The other preallocated buffer was free and is gone already.
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[test]
    fn test_dispose_twice_fails() {
        let pool = pool(2, true);
        pool.dispose().unwrap();
        assert!(matches!(pool.dispose(), Err(Error::AlreadyDisposed)));
    }

    #[test]
    fn test_acquire_after_dispose_fails() {
        let pool = pool(2, true);
        pool.dispose().unwrap();
        assert!(matches!(pool.acquire(), Err(Error::UseAfterDispose)));
    }

    #[test]
    fn test_recycle_after_dispose_destroys() {
        let pool = pool(1, true);
        let buffer = pool.acquire().unwrap();
        pool.dispose().unwrap();
        pool.recycle(Arc::clone(&buffer)).unwrap();

        assert_eq!(buffer.state(), BufferState::Destroyed);
        assert!(buffer.lock_pixels().is_none());
        let stats = pool.stats();
        assert_eq!(stats.free_buffers, 0);
        assert_eq!(stats.destroyed, stats.allocated);
    }

    #[test]
    fn test_dispose_without_deferral_releases_everything() {
        let pool = pool(1, false);
        let buffer = pool.acquire().unwrap();
        pool.dispose().unwrap();
        assert_eq!(buffer.state(), BufferState::Destroyed);
        // Returning it afterwards is harmless and does not count twice.
        pool.recycle(buffer).unwrap();
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[test]
    fn test_lease_delays_reuse() {
        let pool = pool(0, true);
        let buffer = pool.acquire().unwrap();
        let lease = buffer.lease().unwrap();
        pool.recycle(Arc::clone(&buffer)).unwrap();

        assert_eq!(buffer.state(), BufferState::Rendering);
        assert_eq!(pool.stats().free_buffers, 0);

        drop(lease);
        assert_eq!(buffer.state(), BufferState::Free);
        assert_eq!(pool.stats().free_buffers, 1);
    }

    #[test]
    fn test_lease_completion_destroys_pending_buffer_once() {
        let pool = pool(0, true);
        let buffer = pool.acquire().unwrap();
        let lease = buffer.lease().unwrap();
        pool.recycle(Arc::clone(&buffer)).unwrap();
        pool.dispose().unwrap();
        assert_eq!(buffer.state(), BufferState::PendingDispose);

        drop(lease);
        assert_eq!(buffer.state(), BufferState::Destroyed);
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.destroyed, 1);
    }

    #[test]
    fn test_no_lease_without_deferral() {
        let pool = pool(1, false);
        let buffer = pool.acquire().unwrap();
        assert!(buffer.lease().is_none());
    }

    #[test]
    fn test_dropping_pool_tears_down() {
        let pool = pool(2, true);
        let buffer = pool.acquire().unwrap();
        let lease = buffer.lease().unwrap();
        drop(pool);
        assert_eq!(buffer.state(), BufferState::PendingDispose);
        assert!(buffer.lease().is_none());

        // The owner token is still out, so completing the draw keeps it alive.
        drop(lease);
        assert_eq!(buffer.state(), BufferState::PendingDispose);
        assert!(buffer.release_ref());
    }
}
