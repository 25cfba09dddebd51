//! Bounded outbound queue between the capture pipeline and the transport.
//!
//! Capture must never wait on the network, so pushes are synchronous and
//! never block.  When the queue is full the configured [`OverflowPolicy`]
//! decides which block is sacrificed, and every sacrifice is counted so a
//! degraded link shows up in logs and status instead of vanishing silently.
//!
//! ```text
//! capture ──push──▶ [ b3 b4 b5 b6 ] ──recv().await──▶ sender task ──▶ transport
//!                   (capacity 4, DropOldest: b7 evicts b3)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sobjanta_live::audio::{BoundedQueue, OverflowPolicy};
//!
//! let mut q = BoundedQueue::new(2, OverflowPolicy::DropOldest);
//! q.push(1);
//! q.push(2);
//! assert_eq!(q.push(3), Some(1)); // oldest evicted
//! assert_eq!(q.drain(), vec![2, 3]);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::codec::EncodedBlob;

// ---------------------------------------------------------------------------
// OverflowPolicy
// ---------------------------------------------------------------------------

/// What to discard when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued block so the freshest audio goes out first.
    #[default]
    DropOldest,
    /// Keep what is queued and discard the incoming block.
    DropNewest,
}

// ---------------------------------------------------------------------------
// BoundedQueue
// ---------------------------------------------------------------------------

/// A fixed-capacity FIFO.
///
/// The queue never grows beyond its initial capacity; overflow is resolved
/// by the [`OverflowPolicy`] and tallied in [`dropped`](Self::dropped).
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl<T> BoundedQueue<T> {
    /// Create a new queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Append `item`, returning whichever item was discarded to make room
    /// (the evicted oldest item, or `item` itself under `DropNewest`).
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return None;
        }

        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(item);
                evicted
            }
            OverflowPolicy::DropNewest => Some(item),
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove and return every queued item in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Discard all queued items.  The drop counter is preserved.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Total number of items discarded by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ---------------------------------------------------------------------------
// OutboundQueue
// ---------------------------------------------------------------------------

/// Result of [`OutboundQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued, but the oldest block was evicted.
    EvictedOldest,
    /// The queue was full and the new block was discarded.
    Rejected,
    /// The queue has been closed; the block was discarded.
    Closed,
}

struct OutboundState {
    queue: BoundedQueue<EncodedBlob>,
    closed: bool,
}

/// Single-consumer async queue of encoded microphone blocks.
///
/// Shared as `Arc<OutboundQueue>` between the session loop (producer) and
/// the sender task (consumer).
pub struct OutboundQueue {
    state: Mutex<OutboundState>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(OutboundState {
                queue: BoundedQueue::new(capacity, policy),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `blob` without waiting.
    pub fn push(&self, blob: EncodedBlob) -> PushOutcome {
        let outcome = {
            let mut st = self.lock();
            if st.closed {
                return PushOutcome::Closed;
            }
            let policy = st.queue.policy();
            match st.queue.push(blob) {
                None => PushOutcome::Queued,
                Some(_) if policy == OverflowPolicy::DropOldest => PushOutcome::EvictedOldest,
                Some(_) => PushOutcome::Rejected,
            }
        };
        if outcome != PushOutcome::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next block.  Returns `None` once the queue is closed;
    /// blocks still queued at close time are discarded.
    pub async fn recv(&self) -> Option<EncodedBlob> {
        loop {
            {
                let mut st = self.lock();
                if st.closed {
                    return None;
                }
                if let Some(blob) = st.queue.pop() {
                    return Some(blob);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting blocks and wake the consumer.  Idempotent.
    pub fn close(&self) {
        {
            let mut st = self.lock();
            st.closed = true;
            st.queue.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Blocks lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.lock().queue.dropped()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::codec::pcm_mime_type;

    fn blob(tag: u8) -> EncodedBlob {
        EncodedBlob {
            data: vec![tag, 0],
            mime_type: pcm_mime_type(16_000),
        }
    }

    // ---- BoundedQueue ------------------------------------------------------

    #[test]
    fn fifo_within_capacity() {
        let mut q = BoundedQueue::new(4, OverflowPolicy::DropOldest);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert!(q.is_empty());
        assert_eq!(q.dropped(), 0);
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let mut q = BoundedQueue::new(3, OverflowPolicy::DropOldest);
        for i in 1..=5 {
            q.push(i);
        }
        assert!(q.is_full());
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.drain(), vec![3, 4, 5]);
    }

    #[test]
    fn drop_newest_keeps_head() {
        let mut q = BoundedQueue::new(2, OverflowPolicy::DropNewest);
        q.push(1);
        q.push(2);
        assert_eq!(q.push(3), Some(3));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.drain(), vec![1, 2]);
    }

    #[test]
    fn clear_preserves_drop_count() {
        let mut q = BoundedQueue::new(1, OverflowPolicy::DropOldest);
        q.push(1);
        q.push(2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    #[should_panic(expected = "BoundedQueue capacity must be > 0")]
    fn zero_capacity_panics() {
        let _q: BoundedQueue<u8> = BoundedQueue::new(0, OverflowPolicy::DropOldest);
    }

    // ---- OutboundQueue -----------------------------------------------------

    #[tokio::test]
    async fn recv_returns_blocks_in_order() {
        let q = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        assert_eq!(q.push(blob(1)), PushOutcome::Queued);
        assert_eq!(q.push(blob(2)), PushOutcome::Queued);
        assert_eq!(q.recv().await.unwrap().data[0], 1);
        assert_eq!(q.recv().await.unwrap().data[0], 2);
    }

    #[tokio::test]
    async fn saturated_link_evicts_oldest_and_counts() {
        let q = OutboundQueue::new(2, OverflowPolicy::DropOldest);
        q.push(blob(1));
        q.push(blob(2));
        assert_eq!(q.push(blob(3)), PushOutcome::EvictedOldest);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.recv().await.unwrap().data[0], 2);
    }

    #[tokio::test]
    async fn rejected_under_drop_newest() {
        let q = OutboundQueue::new(1, OverflowPolicy::DropNewest);
        q.push(blob(1));
        assert_eq!(q.push(blob(2)), PushOutcome::Rejected);
        assert_eq!(q.recv().await.unwrap().data[0], 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_push_from_another_task() {
        let q = Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(blob(7));
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .unwrap();
        assert_eq!(got.unwrap().data[0], 7);
    }

    #[tokio::test]
    async fn close_wakes_consumer_and_rejects_pushes() {
        let q = Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close();
        q.close();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .unwrap();
        assert!(got.is_none());
        assert_eq!(q.push(blob(1)), PushOutcome::Closed);
        assert!(q.is_closed());
    }
}
