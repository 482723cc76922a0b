//! FIFO handoff queues shared between producer threads (the TCP listener,
//! the UI) and the single-threaded peer tick loop that consumes them.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Single-producer / single-consumer FIFO with atomic append and
/// drain-and-clear semantics.
#[derive(Clone)]
pub struct HandoffQueue<T> {
    items: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<T> HandoffQueue<T> {
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Drain everything queued so far, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}

/// Raw byte blobs handed off from accepted connections to the tick loop.
pub type InboundBuffer = HandoffQueue<Vec<u8>>;
/// Shell-tokenized command lines handed off from the UI thread.
pub type CommandBuffer = HandoffQueue<Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_items_in_fifo_order_and_empties_the_queue() {
        let queue: HandoffQueue<u32> = HandoffQueue::default();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn clone_shares_the_underlying_queue() {
        let queue: HandoffQueue<&'static str> = HandoffQueue::default();
        let producer = queue.clone();

        producer.push("hello");

        assert_eq!(queue.drain(), vec!["hello"]);
    }
}
