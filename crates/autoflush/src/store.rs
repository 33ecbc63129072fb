//! Content store - bounded ordered buffer of pending items
//!
//! Backed by a `HeapRb` sized to the flush threshold. Appending the item that fills
//! the ring drains it in the same call, so the store never holds more than its
//! capacity and a sealed batch never aliases later inserts.

use std::fmt;

use ringbuf::{traits::*, HeapRb};

/// Pending items awaiting a flush
pub struct ContentStore<T> {
    ring: HeapRb<T>,
}

impl<T> fmt::Debug for ContentStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStore")
            .field("len", &self.ring.occupied_len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> ContentStore<T> {
    /// Create a store that seals a batch every `capacity` items
    ///
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity),
        }
    }

    /// Append an item, returning the drained batch if it filled the store
    #[inline]
    pub fn enqueue(&mut self, item: T) -> Option<Vec<T>> {
        if let Err(item) = self.ring.try_push(item) {
            // only reachable if a caller bypassed the threshold drain
            let mut batch = self.drain();
            batch.push(item);
            return Some(batch);
        }
        if self.ring.is_full() {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Remove and return every pending item in insertion order
    #[inline]
    pub fn drain(&mut self) -> Vec<T> {
        self.ring.pop_iter().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }
}
