//! Sequence-tagged replies from a client task back to its callers.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU32, Ordering};

/// Single-slot reply mailbox keyed by request sequence numbers.
///
/// Sequence numbers come from the mailbox itself and do not repeat while it
/// lives, so a reply to an abandoned request can never complete a later
/// one, even across sessions.
pub struct ReplySlot<M: RawMutex, T> {
    signal: Signal<M, (u32, T)>,
    seq: AtomicU32,
}

impl<M: RawMutex, T> ReplySlot<M, T> {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
            seq: AtomicU32::new(0),
        }
    }

    /// Sequence number for a new request.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Answer request `seq`, replacing any reply nobody collected.
    pub fn reply(&self, seq: u32, value: T) {
        self.signal.signal((seq, value));
    }

    /// Drop a reply nobody collected.
    pub fn clear(&self) {
        self.signal.reset();
    }

    /// Wait for the reply to request `seq`, discarding stale ones.
    pub async fn wait(&self, seq: u32) -> T {
        loop {
            let (replied, value) = self.signal.wait().await;
            if replied == seq {
                return value;
            }
            debug!("ignoring stale reply {}", replied);
        }
    }
}

impl<M: RawMutex, T> Default for ReplySlot<M, T> {
    fn default() -> Self {
        Self::new()
    }
}
