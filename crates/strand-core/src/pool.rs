//! Object pools for recycling short-lived objects without allocation churn.
//!
//! Two variants share one contract — `get()` never fails (falls back to the
//! creation closure), `put()` cleans the item and makes it available again —
//! and differ only in concurrency discipline:
//!
//! - [`LocalPool`] is correct only when `get`/`put` both happen on one logical
//!   owner (typically one per worker thread); it carries no synchronization.
//! - [`SharedPool`] is safe for concurrent use from any thread. The common
//!   case swaps a single "hot" slot without touching the shared queue; the
//!   fallback is a bounded lock-free queue.

use crossbeam::atomic::AtomicCell;
use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A pooled object that can be cleaned for reuse.
///
/// `cleanup()` runs on every return to a pool, before the item becomes
/// available again. Implementations must clear references that would
/// otherwise keep captured state alive between uses.
pub trait Recyclable {
    /// Reset the object to a reusable state.
    fn cleanup(&mut self);
}

impl<T> Recyclable for VecDeque<T> {
    fn cleanup(&mut self) {
        self.clear();
    }
}

impl<T> Recyclable for Vec<T> {
    fn cleanup(&mut self) {
        self.clear();
    }
}

/// Single-owner pool backed by a plain FIFO buffer.
///
/// No locking: the caller must guarantee that `get` and `put` are only ever
/// invoked from one logical owner. Loop workers keep one of these for their
/// drain batch buffers.
pub struct LocalPool<T: Recyclable> {
    items: VecDeque<T>,
    capacity: usize,
    init: Box<dyn Fn() -> T>,
}

impl<T: Recyclable> LocalPool<T> {
    /// Create a pool holding up to `capacity` items, creating new ones with `init`.
    pub fn new(capacity: usize, init: impl Fn() -> T + 'static) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            init: Box::new(init),
        }
    }

    /// Take an item from the pool, or create a fresh one.
    pub fn get(&mut self) -> T {
        self.items.pop_front().unwrap_or_else(|| (self.init)())
    }

    /// Clean an item and return it to the pool. Items above capacity are dropped.
    pub fn put(&mut self, mut item: T) {
        item.cleanup();
        if self.items.len() < self.capacity {
            self.items.push_back(item);
        }
    }

    /// Number of items currently pooled.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the pool is currently empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Multi-owner pool safe for concurrent `get`/`put` from many threads.
///
/// A one-slot hot path (an atomically swappable reference) keeps the common
/// get-after-put exchange off the shared queue; the overflow queue is bounded
/// and lock-free. A running count caps the pool at its configured capacity:
/// items returned above capacity are simply dropped, never destroyed early.
pub struct SharedPool<T: Recyclable> {
    hot: AtomicCell<Option<T>>,
    overflow: ArrayQueue<T>,
    pooled: AtomicUsize,
    capacity: usize,
    init: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Recyclable> SharedPool<T> {
    /// Create a pool holding up to `capacity` items, creating new ones with `init`.
    pub fn new(capacity: usize, init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            hot: AtomicCell::new(None),
            overflow: ArrayQueue::new(capacity.max(1)),
            pooled: AtomicUsize::new(0),
            capacity,
            init: Box::new(init),
        }
    }

    /// Take an item from the pool, or create a fresh one.
    pub fn get(&self) -> T {
        if let Some(item) = self.hot.take() {
            self.pooled.fetch_sub(1, Ordering::Relaxed);
            return item;
        }
        if let Some(item) = self.overflow.pop() {
            self.pooled.fetch_sub(1, Ordering::Relaxed);
            return item;
        }
        (self.init)()
    }

    /// Clean an item and return it to the pool. Items above capacity are dropped.
    pub fn put(&self, mut item: T) {
        item.cleanup();
        if self.pooled.load(Ordering::Relaxed) >= self.capacity {
            return;
        }
        self.pooled.fetch_add(1, Ordering::Relaxed);
        if let Some(displaced) = self.hot.swap(Some(item)) {
            // Hot slot was occupied: the displaced item goes to the overflow queue.
            if self.overflow.push(displaced).is_err() {
                self.pooled.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of items currently pooled.
    pub fn len(&self) -> usize {
        self.pooled.load(Ordering::Relaxed)
    }

    /// Whether the pool is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Buffer {
        tag: usize,
        data: Vec<u8>,
        cleanups: usize,
    }

    impl Buffer {
        fn new(tag: usize) -> Self {
            Self {
                tag,
                data: Vec::new(),
                cleanups: 0,
            }
        }
    }

    impl Recyclable for Buffer {
        fn cleanup(&mut self) {
            self.data.clear();
            self.cleanups += 1;
        }
    }

    #[test]
    fn test_local_round_trip_returns_same_instance() {
        let mut pool = LocalPool::new(4, || Buffer::new(0));

        let mut buf = Buffer::new(77);
        buf.data.extend_from_slice(b"payload");
        pool.put(buf);

        let recycled = pool.get();
        assert_eq!(recycled.tag, 77);
        assert_eq!(recycled.cleanups, 1);
        assert!(recycled.data.is_empty());
    }

    #[test]
    fn test_local_capacity_drops_excess() {
        let mut pool = LocalPool::new(2, || Buffer::new(0));

        pool.put(Buffer::new(1));
        pool.put(Buffer::new(2));
        pool.put(Buffer::new(3)); // above capacity: dropped

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get().tag, 1);
        assert_eq!(pool.get().tag, 2);
        // Pool empty: falls back to the creation closure.
        assert_eq!(pool.get().tag, 0);
    }

    #[test]
    fn test_local_fifo_order() {
        let mut pool = LocalPool::new(4, || Buffer::new(0));
        pool.put(Buffer::new(1));
        pool.put(Buffer::new(2));

        assert_eq!(pool.get().tag, 1);
        assert_eq!(pool.get().tag, 2);
    }

    #[test]
    fn test_shared_hot_slot_round_trip() {
        let pool = SharedPool::new(4, || Buffer::new(0));

        let mut buf = Buffer::new(42);
        buf.data.push(9);
        pool.put(buf);
        assert_eq!(pool.len(), 1);

        let recycled = pool.get();
        assert_eq!(recycled.tag, 42);
        assert_eq!(recycled.cleanups, 1);
        assert!(recycled.data.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_shared_overflow_and_cap() {
        let pool = SharedPool::new(2, || Buffer::new(0));

        pool.put(Buffer::new(1)); // lands in hot slot
        pool.put(Buffer::new(2)); // displaces into overflow
        pool.put(Buffer::new(3)); // above capacity: dropped

        assert_eq!(pool.len(), 2);

        let mut tags = vec![pool.get().tag, pool.get().tag];
        tags.sort_unstable();
        assert_eq!(tags, vec![1, 2]);
        assert_eq!(pool.get().tag, 0);
    }

    #[test]
    fn test_shared_concurrent_churn() {
        let pool = Arc::new(SharedPool::new(8, || Buffer::new(0)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        let mut buf = pool.get();
                        buf.data.push(i as u8);
                        pool.put(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.len() <= pool.capacity());
        // Every pooled item was cleaned on its way back in.
        let buf = pool.get();
        assert!(buf.data.is_empty());
    }
}
