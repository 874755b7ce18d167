//! Bounded FIFO of pending append requests.
//!
//! Backed by `crossbeam-queue::ArrayQueue`, so producers on any thread push
//! without taking the drain lock. A full queue hands the request back to
//! the producer, which drains inline and retries: appends wait, they are
//! never dropped.

use crossbeam_queue::ArrayQueue;

/// Result of attempting to push onto the queue.
#[derive(Debug)]
pub(crate) enum PushResult<T> {
    Ok,
    /// Queue is full; the item is returned untouched.
    Backpressure(T),
}

#[derive(Debug)]
pub(crate) struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0. Configuration validation rejects that
    /// before any queue is built.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    pub(crate) fn try_push(&self, item: T) -> PushResult<T> {
        match self.inner.push(item) {
            Ok(()) => PushResult::Ok,
            Err(item) => PushResult::Backpressure(item),
        }
    }

    /// Removes the oldest item.
    pub(crate) fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
