//! Static gateway configuration.
//!
//! Everything here is fixed at build time or passed by value at startup;
//! nothing is reloaded while the pipeline runs.

use crate::broker::QoS;

/// Capacity of each pipeline queue (raw lines and validated messages).
pub const QUEUE_CAPACITY: usize = 16;

/// Size of the serial accumulation buffer.
///
/// A line is cut at `LINE_BUFFER_SIZE - 1` bytes, so that is the longest
/// record forwarded intact.
pub const LINE_BUFFER_SIZE: usize = 2048;

/// Upper bound on a single serial byte read before the reader wakes up.
pub const READ_TIMEOUT_MS: u64 = 2_000;

/// Record delimiter on the serial link.
pub const LINE_DELIMITER: u8 = b'\n';

/// Maximum publish topic length.
pub const TOPIC_CAPACITY: usize = 128;

/// Depth of the network event queue feeding the lifecycle actor.
pub const EVENT_QUEUE_CAPACITY: usize = 8;

/// Broker session start attempts made for one acquired address before the
/// lifecycle waits for the next network event.
pub const SESSION_START_ATTEMPTS: u32 = 3;

/// Delivery guarantee for every published record.
pub const DEFAULT_QOS: QoS = QoS::AtLeastOnce;

/// Published records are never retained by the broker.
pub const RETAIN: bool = false;

/// Fixed part of the publish topic: `<prefix>/<device_class>/<selector>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopicScheme {
    /// Top-level namespace, e.g. `sensors`.
    pub prefix: &'static str,
    /// Class of the upstream device, e.g. `bluepill`.
    pub device_class: &'static str,
}

impl TopicScheme {
    /// Namespace existing subscribers listen on.
    pub const DEFAULT: Self = Self::new("sensors", "bluepill");

    /// Create a topic scheme.
    #[must_use]
    pub const fn new(prefix: &'static str, device_class: &'static str) -> Self {
        Self {
            prefix,
            device_class,
        }
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What the serial reader does with a line that overflowed its buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TruncationPolicy {
    /// Forward the truncated prefix as a record; the remainder of the line
    /// starts the next record.
    #[default]
    Forward,
    /// Drop the truncated prefix and skip input up to the next delimiter.
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scheme() {
        let scheme = TopicScheme::default();
        assert_eq!(scheme.prefix, "sensors");
        assert_eq!(scheme.device_class, "bluepill");
    }

    #[test]
    fn test_truncated_lines_are_forwarded_by_default() {
        assert_eq!(TruncationPolicy::default(), TruncationPolicy::Forward);
    }
}
