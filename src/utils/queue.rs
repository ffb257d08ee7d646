use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A bounded queue that drops new items once it is full.
///
/// This is the queue behind every subscription. The receiver thread pushes
/// and the user's dispatch thread pops; when the consumer falls behind, the
/// newest messages are the ones that get lost, and each loss is counted.
/// A capacity of zero removes the bound.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,

    /// Maximum number of queued items. Zero means unbounded.
    capacity: AtomicUsize,

    /// Number of items rejected because the queue was full.
    dropped: AtomicUsize,
}
impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            inner: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Pushes an item into the queue.
    ///
    /// Returns false if the queue was full. The item is discarded and the
    /// drop counter incremented.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.lock();
        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity != 0 && inner.len() >= capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        inner.push_back(item);
        true
    }

    /// Removes and returns the oldest item in the queue.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Changes the queue bound. Items already queued beyond a smaller bound
    /// stay queued; only new pushes observe the change.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Returns the number of items lost to overflow so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<VecDeque<T>> {
        // A poisoned queue only means a callback panicked while holding the
        // guard, which cannot happen from this module. The contents are
        // still plain data.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
