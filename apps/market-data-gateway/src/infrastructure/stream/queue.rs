//! Bounded Ingress Queue
//!
//! Fixed-capacity FIFO between the transport read loop and the batch
//! processor. When full, the oldest pending entry is dropped to admit the
//! new one; the queue never grows unboundedly and never blocks the
//! producer. It knows nothing about message content.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

/// Counter snapshot for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    /// Entries accepted, including ones later dropped.
    pub enqueued: u64,
    /// Entries discarded by drop-oldest backpressure.
    pub dropped: u64,
    /// Entries handed to the processor.
    pub processed: u64,
    /// Entries currently pending.
    pub depth: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    enqueued: u64,
    dropped: u64,
    processed: u64,
}

/// Fixed-capacity FIFO with drop-oldest backpressure.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` pending entries.
    ///
    /// A zero capacity is clamped to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                enqueued: 0,
                dropped: 0,
                processed: 0,
            }),
        }
    }

    /// Enqueue an entry, dropping the oldest pending one at capacity.
    ///
    /// Returns `true` when an old entry was dropped to make room.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();

        let mut dropped = false;
        if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.dropped += 1;
            dropped = true;
        }

        state.items.push_back(item);
        state.enqueued += 1;
        dropped
    }

    /// Dequeue up to `max` entries in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();

        let count = state.items.len().min(max);
        let batch: Vec<T> = state.items.drain(..count).collect();
        state.processed += batch.len() as u64;
        batch
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue has no pending entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            enqueued: state.enqueued,
            dropped: state.dropped,
            processed: state.processed,
            depth: state.items.len(),
        }
    }

    /// Discard all pending entries (shutdown path).
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fifo_order_preserved() {
        let queue = BoundedQueue::new(10);
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.drain(10), vec![1, 2, 3]);
    }

    #[test]
    fn drop_oldest_at_capacity() {
        let queue = BoundedQueue::new(3);
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(!queue.push(3));

        // Fourth push drops entry 1.
        assert!(queue.push(4));

        assert_eq!(queue.drain(10), vec![2, 3, 4]);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn drain_respects_batch_size() {
        let queue = BoundedQueue::new(10);
        for i in 0..5 {
            queue.push(i);
        }

        assert_eq!(queue.drain(2), vec![0, 1]);
        assert_eq!(queue.drain(2), vec![2, 3]);
        assert_eq!(queue.drain(2), vec![4]);
        assert!(queue.drain(2).is_empty());
    }

    #[test]
    fn counters_track_lifecycle() {
        let queue = BoundedQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3); // drops 1

        let _ = queue.drain(10);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.depth, 0);
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let queue = BoundedQueue::new(0);
        queue.push(1);
        queue.push(2);

        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.drain(10), vec![2]);
    }

    #[test]
    fn clear_discards_pending() {
        let queue = BoundedQueue::new(10);
        queue.push(1);
        queue.clear();
        assert!(queue.is_empty());
    }

    proptest! {
        /// Depth never exceeds capacity, and each over-capacity push drops
        /// exactly one entry.
        #[test]
        fn depth_never_exceeds_capacity(
            capacity in 1usize..64,
            pushes in 0usize..256,
        ) {
            let queue = BoundedQueue::new(capacity);
            let mut expected_drops = 0u64;

            for i in 0..pushes {
                let dropped = queue.push(i);
                if i >= capacity {
                    prop_assert!(dropped);
                    expected_drops += 1;
                } else {
                    prop_assert!(!dropped);
                }
                prop_assert!(queue.len() <= capacity);
            }

            prop_assert_eq!(queue.stats().dropped, expected_drops);
        }
    }
}
