//! Pipeline counters.
//!
//! Every stage bumps a counter alongside its log line, which makes drops and
//! failures observable without a log sink.

use portable_atomic::{AtomicU32, Ordering};

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatEvent {
    LineRead,
    LineTruncated,
    RawDropped,
    AllocFailure,
    Malformed,
    Validated,
    MessageDropped,
    Published,
    PublishFailed,
    Reconnect,
}

/// Lock-free counters shared by reference with every pipeline stage.
#[derive(Debug, Default)]
pub struct GatewayStats {
    lines_read: AtomicU32,
    lines_truncated: AtomicU32,
    raw_dropped: AtomicU32,
    alloc_failures: AtomicU32,
    malformed: AtomicU32,
    validated: AtomicU32,
    messages_dropped: AtomicU32,
    published: AtomicU32,
    publish_failed: AtomicU32,
    reconnects: AtomicU32,
}

impl GatewayStats {
    pub const fn new() -> Self {
        Self {
            lines_read: AtomicU32::new(0),
            lines_truncated: AtomicU32::new(0),
            raw_dropped: AtomicU32::new(0),
            alloc_failures: AtomicU32::new(0),
            malformed: AtomicU32::new(0),
            validated: AtomicU32::new(0),
            messages_dropped: AtomicU32::new(0),
            published: AtomicU32::new(0),
            publish_failed: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
        }
    }

    pub(crate) fn count(&self, event: StatEvent) {
        let counter = match event {
            StatEvent::LineRead => &self.lines_read,
            StatEvent::LineTruncated => &self.lines_truncated,
            StatEvent::RawDropped => &self.raw_dropped,
            StatEvent::AllocFailure => &self.alloc_failures,
            StatEvent::Malformed => &self.malformed,
            StatEvent::Validated => &self.validated,
            StatEvent::MessageDropped => &self.messages_dropped,
            StatEvent::Published => &self.published,
            StatEvent::PublishFailed => &self.publish_failed,
            StatEvent::Reconnect => &self.reconnects,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_truncated: self.lines_truncated.load(Ordering::Relaxed),
            raw_dropped: self.raw_dropped.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Lines completed by the serial reader (including truncated ones).
    pub lines_read: u32,
    /// Lines cut at the buffer bound.
    pub lines_truncated: u32,
    /// Lines dropped because the raw-line queue was full.
    pub raw_dropped: u32,
    /// Records skipped because their buffer could not be allocated.
    pub alloc_failures: u32,
    /// Lines that failed validation.
    pub malformed: u32,
    /// Lines accepted into the message queue.
    pub validated: u32,
    /// Messages dropped because the message queue was full.
    pub messages_dropped: u32,
    /// Publish attempts accepted by the broker session.
    pub published: u32,
    /// Publish attempts that failed.
    pub publish_failed: u32,
    /// Network disconnections that triggered a reconnect.
    pub reconnects: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_independent() {
        let stats = GatewayStats::new();
        stats.count(StatEvent::LineRead);
        stats.count(StatEvent::LineRead);
        stats.count(StatEvent::Malformed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lines_read, 2);
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.published, 0);
    }

    #[test]
    fn test_new_is_zeroed() {
        assert_eq!(GatewayStats::new().snapshot(), StatsSnapshot::default());
    }
}
