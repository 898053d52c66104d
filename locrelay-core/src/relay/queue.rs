//! In-memory retry queue
//!
//! Holds events whose immediate delivery failed until the next
//! connectivity-restored signal. Volatile: nothing survives the session.
//!
//! Enqueue and drain share one mutex. A drain swaps the live buffer for an
//! empty one, so an enqueue racing with it lands either in the snapshot or
//! in the fresh buffer, never both and never neither.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::LocationEvent;

/// FIFO buffer of events awaiting retry
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    events: Mutex<VecDeque<LocationEvent>>,
    /// Oldest events are evicted past this length; `None` is unbounded
    capacity: Option<usize>,
}

impl DeliveryQueue {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that evicts its oldest event once `capacity` is reached
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Append to the tail. Returns the evicted event when the cap was hit.
    pub fn enqueue(&self, event: LocationEvent) -> Option<LocationEvent> {
        let mut events = self.lock();
        let evicted = match self.capacity {
            Some(capacity) if events.len() >= capacity => events.pop_front(),
            _ => None,
        };
        events.push_back(event);
        evicted
    }

    /// Detach everything queued so far, leaving the live queue empty.
    pub fn drain_and_clear(&self) -> Vec<LocationEvent> {
        let detached = std::mem::take(&mut *self.lock());
        detached.into()
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LocationEvent> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LocationEvent>> {
        // Critical sections never panic midway, so a poisoned buffer is intact
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn event(n: i64) -> LocationEvent {
        LocationEvent::new(n as f64, -(n as f64), 1_700_000_000 + n)
    }

    #[test]
    fn test_fifo_order_and_no_dedup() {
        let queue = DeliveryQueue::new();
        queue.enqueue(event(1));
        queue.enqueue(event(2));
        queue.enqueue(event(1));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.snapshot(), vec![event(1), event(2), event(1)]);
    }

    #[test]
    fn test_drain_detaches_and_clears() {
        let queue = DeliveryQueue::new();
        queue.enqueue(event(1));
        queue.enqueue(event(2));

        let drained = queue.drain_and_clear();
        assert_eq!(drained, vec![event(1), event(2)]);
        assert!(queue.is_empty());
        assert!(queue.drain_and_clear().is_empty());

        // Enqueues after a drain go to the fresh buffer
        queue.enqueue(event(3));
        assert_eq!(queue.snapshot(), vec![event(3)]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let queue = DeliveryQueue::with_capacity_limit(2);
        assert!(queue.enqueue(event(1)).is_none());
        assert!(queue.enqueue(event(2)).is_none());
        assert_eq!(queue.enqueue(event(3)), Some(event(1)));
        assert_eq!(queue.snapshot(), vec![event(2), event(3)]);
    }

    #[test]
    fn test_concurrent_enqueue_during_drain_is_never_lost_or_duplicated() {
        const ORIGINALS: i64 = 200;
        const WRITERS: i64 = 4;
        const PER_WRITER: i64 = 250;

        let queue = Arc::new(DeliveryQueue::new());
        for n in 0..ORIGINALS {
            queue.enqueue(event(n));
        }

        let barrier = Arc::new(Barrier::new(WRITERS as usize + 1));
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_WRITER {
                        queue.enqueue(event(10_000 + w * PER_WRITER + i));
                    }
                })
            })
            .collect();

        barrier.wait();
        let drained = queue.drain_and_clear();
        for writer in writers {
            writer.join().unwrap();
        }
        let remaining = queue.drain_and_clear();

        // Every original was detached by the drain
        let drained_keys: HashSet<i64> = drained.iter().map(|e| e.captured_at).collect();
        for n in 0..ORIGINALS {
            assert!(drained_keys.contains(&(1_700_000_000 + n)));
        }

        // Nothing lost, nothing counted twice
        let total = drained.len() + remaining.len();
        assert_eq!(total as i64, ORIGINALS + WRITERS * PER_WRITER);
        let all: HashSet<i64> = drained
            .iter()
            .chain(remaining.iter())
            .map(|e| e.captured_at)
            .collect();
        assert_eq!(all.len(), total);
    }
}
