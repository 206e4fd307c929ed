//! Thread-safe FIFO with a blocking pop

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Multi-producer, multi-consumer FIFO queue.
///
/// Used to hand tasks to the workers and to return them to the network
/// thread once their action has run.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Append an element and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.not_empty.notify_one();
    }

    /// Remove the oldest element, waiting until one is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Remove the oldest element if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.pop(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_pop_empty() {
        let queue: BlockingQueue<u32> = BlockingQueue::new();
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_pop_waits_for_producer() {
        let queue = Arc::new(BlockingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(42u64);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let queue = Arc::new(BlockingQueue::new());
        let mut producers = vec![];
        for p in 0..4u64 {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..250 {
                    queue.push(p * 1000 + i);
                }
            }));
        }

        let mut consumers = vec![];
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(thread::spawn(move || {
                (0..250).map(|_| queue.pop()).collect::<Vec<_>>()
            }));
        }

        for p in producers {
            p.join().unwrap();
        }
        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert!(queue.is_empty());
    }
}
