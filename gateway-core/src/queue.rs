//! Bounded FIFO between pipeline stages.
//!
//! Producers never wait: when the queue is full the item is handed back in
//! [`Rejected`] and dropping it frees it. Consumers wait indefinitely.

use crate::config::QUEUE_CAPACITY;
use crate::record::{RawLine, ValidatedMessage};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};

/// Queue of raw serial lines (reader → validator).
pub type RawLineQueue<M> = BoundedRecordQueue<M, RawLine, QUEUE_CAPACITY>;

/// Queue of canonical messages (validator → publisher).
pub type MessageQueue<M> = BoundedRecordQueue<M, ValidatedMessage, QUEUE_CAPACITY>;

/// An item the queue refused because it was full.
#[derive(Debug, PartialEq, Eq)]
pub struct Rejected<T>(pub T);

impl<T> Rejected<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Fixed-capacity, drop-on-full FIFO.
///
/// Each instance has one producer task and one consumer task. `M` selects
/// the mutex flavour: `CriticalSectionRawMutex` when the two tasks run on
/// different executors, `NoopRawMutex` within one.
pub struct BoundedRecordQueue<M: RawMutex, T, const N: usize = QUEUE_CAPACITY> {
    channel: Channel<M, T, N>,
}

impl<M: RawMutex, T, const N: usize> BoundedRecordQueue<M, T, N> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue without waiting.
    ///
    /// Returns the item back when the queue already holds `N` items.
    pub fn try_enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        match self.channel.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(Rejected(item)),
        }
    }

    /// Wait for the next item.
    pub async fn dequeue(&self) -> T {
        self.channel.receive().await
    }

    /// Take the next item if one is waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<M: RawMutex, T, const N: usize> Default for BoundedRecordQueue<M, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::rc::Rc;

    #[test]
    fn test_fifo_order() {
        let queue: BoundedRecordQueue<NoopRawMutex, u32, 4> = BoundedRecordQueue::new();
        for i in 0..3 {
            queue.try_enqueue(i).unwrap();
        }
        assert_eq!(block_on(queue.dequeue()), 0);
        assert_eq!(block_on(queue.dequeue()), 1);
        assert_eq!(queue.try_dequeue(), Some(2));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_rejects_beyond_capacity() {
        let queue: BoundedRecordQueue<NoopRawMutex, u32> = BoundedRecordQueue::new();
        assert_eq!(queue.capacity(), 16);
        for i in 0..16 {
            assert!(queue.try_enqueue(i).is_ok());
        }
        assert!(queue.is_full());
        assert_eq!(queue.try_enqueue(99), Err(Rejected(99)));
        assert_eq!(queue.len(), 16);
    }

    #[test]
    fn test_rejected_item_is_released() {
        // Rc strong counts expose whether the rejected value was leaked.
        let token = Rc::new(());
        let queue: BoundedRecordQueue<NoopRawMutex, Rc<()>, 1> = BoundedRecordQueue::new();
        queue.try_enqueue(token.clone()).unwrap();

        let rejected = queue.try_enqueue(token.clone()).unwrap_err();
        assert_eq!(Rc::strong_count(&token), 3);
        drop(rejected);
        assert_eq!(Rc::strong_count(&token), 2);

        drop(queue.try_dequeue());
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn test_space_frees_after_dequeue() {
        let queue: BoundedRecordQueue<NoopRawMutex, u32, 2> = BoundedRecordQueue::new();
        queue.try_enqueue(1).unwrap();
        queue.try_enqueue(2).unwrap();
        assert!(queue.try_enqueue(3).is_err());
        assert_eq!(queue.try_dequeue(), Some(1));
        assert!(queue.try_enqueue(3).is_ok());
        assert_eq!(queue.try_dequeue(), Some(2));
        assert_eq!(queue.try_dequeue(), Some(3));
        assert!(queue.is_empty());
    }
}
