//! Outbound queue for fire-and-forget sends
//!
//! Unbounded lock-free MPSC FIFO on top of `crossbeam_queue::SegQueue`.
//! Any thread may push; the connection's I/O thread is the only consumer.

use crossbeam_queue::SegQueue;

/// Pending async send payloads
pub struct OutboundQueue<T = String> {
    inner: SegQueue<T>,
}

impl<T> OutboundQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Enqueue a payload. Never blocks.
    #[inline]
    pub fn push(&self, item: T) {
        self.inner.push(item);
    }

    /// Dequeue the oldest payload
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Snapshot; may be stale by the time it is read
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Drop every pending payload, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.inner.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl<T> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_thread() {
        let queue = OutboundQueue::new();
        assert!(queue.is_empty());

        queue.push("a".to_string());
        queue.push("b".to_string());
        queue.push("c".to_string());
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert_eq!(queue.pop().as_deref(), Some("c"));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_multi_producer_keeps_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;

        let queue = Arc::new(OutboundQueue::<(usize, usize)>::new());

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.push((p, seq));
                    }
                })
            })
            .collect();

        // Consume concurrently with the producers
        let mut next = [0usize; PRODUCERS];
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            match queue.pop() {
                Some((p, seq)) => {
                    assert_eq!(seq, next[p], "producer {p} out of order");
                    next[p] += 1;
                    received += 1;
                }
                None => thread::yield_now(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(queue.pop().is_none());
        assert!(next.iter().all(|&n| n == PER_PRODUCER));
    }

    #[test]
    fn test_clear_drops_pending() {
        let queue = OutboundQueue::new();
        for i in 0..5 {
            queue.push(i.to_string());
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }
}
