use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transport::{Endpoint, Handle};

/// Clients waiting for the agent, in connection-arrival order.
///
/// The acceptor is the only producer and the dispatcher the only consumer;
/// both serialize on one lock and neither ever blocks on an empty queue.
#[derive(Debug)]
pub struct WaitingQueue<H = Arc<Endpoint>> {
    entries: Mutex<VecDeque<H>>,
}

impl<H> Default for WaitingQueue<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl<H: Handle> WaitingQueue<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail. Returns false, leaving the queue untouched, if
    /// the connection is already waiting.
    pub fn enqueue(&self, handle: H) -> bool {
        let mut entries = self.lock();
        let connection = handle.connection();
        if entries.iter().any(|queued| queued.connection() == connection) {
            return false;
        }
        entries.push_back(handle);
        true
    }

    pub fn dequeue(&self) -> Option<H> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<H>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::transport::tests_support::connection_ids;
    use crate::transport::ConnectionId;

    #[test]
    fn dequeue_follows_enqueue_order() {
        let queue = WaitingQueue::new();
        let ids = connection_ids::<4>();
        for id in ids {
            assert!(queue.enqueue(id));
        }
        assert_eq!(queue.len(), 4);

        let drained: Vec<ConnectionId> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, ids.to_vec());
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_dequeue_returns_none_immediately() {
        let queue: WaitingQueue<ConnectionId> = WaitingQueue::new();
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn handle_is_queued_at_most_once() {
        let queue = WaitingQueue::new();
        let [a, b] = connection_ids::<2>();
        assert!(queue.enqueue(a));
        assert!(queue.enqueue(b));
        assert!(!queue.enqueue(a));
        assert_eq!(queue.len(), 2);

        // Once served it may wait again.
        assert_eq!(queue.dequeue(), Some(a));
        assert!(queue.enqueue(a));
        assert_eq!(queue.dequeue(), Some(b));
        assert_eq!(queue.dequeue(), Some(a));
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_fifo() {
        const TOTAL: usize = 2_000;

        let queue = Arc::new(WaitingQueue::new());
        let ids: Vec<ConnectionId> = connection_ids::<TOTAL>().to_vec();

        let producer = {
            let queue = queue.clone();
            let ids = ids.clone();
            thread::spawn(move || {
                for id in ids {
                    assert!(queue.enqueue(id));
                }
            })
        };

        let mut received = Vec::with_capacity(TOTAL);
        while received.len() < TOTAL {
            match queue.dequeue() {
                Some(id) => received.push(id),
                None => thread::yield_now(),
            }
        }
        producer.join().expect("producer thread");

        assert_eq!(received, ids);
        assert!(queue.is_empty());
    }
}
