use parking_lot::Mutex;
use std::collections::VecDeque;

/// When the consumer takes the presented frame off the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrainPolicy {
    /// Advance unless exactly one frame is queued. A lone frame is a still
    /// image (paused video, single picture) and is redrawn, not consumed.
    #[default]
    HoldSingleFrame,
    /// Advance whenever a frame is queued. The consumer keeps showing its
    /// last surface once the queue runs dry.
    AlwaysAdvance,
}

impl DrainPolicy {
    pub fn should_advance(self, depth: usize) -> bool {
        match self {
            DrainPolicy::HoldSingleFrame => depth != 1,
            DrainPolicy::AlwaysAdvance => depth > 0,
        }
    }
}

/// Thread-safe FIFO between the producer and the render consumer.
///
/// Each operation is a single critical section; [`try_advance`] folds the
/// depth check and the dequeue into one so no enqueue can slip in between.
///
/// [`try_advance`]: PipelineQueue::try_advance
#[derive(Debug)]
pub struct PipelineQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for PipelineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PipelineQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Remove the oldest item.
    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Dequeue the oldest item if `policy` allows it at the current depth.
    pub fn try_advance(&self, policy: DrainPolicy) -> Option<T> {
        let mut items = self.items.lock();
        if policy.should_advance(items.len()) {
            items.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove everything, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}

impl<T: Clone> PipelineQueue<T> {
    /// Clone of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }
}
