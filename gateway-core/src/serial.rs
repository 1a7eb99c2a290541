//! Serial ingestion: bytes in, raw lines out.
//!
//! [`SerialLineReader`] pulls one byte at a time from a [`SerialPort`],
//! accumulates it in a fixed [`LineAssembler`] and hands each completed line
//! to the raw-line queue. A full queue drops the line instead of stalling
//! the port.

use crate::config::{TruncationPolicy, LINE_BUFFER_SIZE, LINE_DELIMITER};
use crate::queue::RawLineQueue;
use crate::record::{printable, RawLine, RecordError};
use crate::stats::{GatewayStats, StatEvent};
use core::future::Future;
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

/// Error type for serial reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// Generic peripheral I/O error.
    Io,
    /// UART framing error.
    Framing,
    /// Receive FIFO overrun; bytes were lost.
    Overrun,
    /// Break condition on the line.
    Break,
}

/// Byte source for the reader.
///
/// Implementations bound each read by [`READ_TIMEOUT_MS`] so the reader
/// wakes periodically even on an idle line.
///
/// [`READ_TIMEOUT_MS`]: crate::config::READ_TIMEOUT_MS
pub trait SerialPort {
    /// Read the next byte.
    ///
    /// Returns `Ok(None)` when the wait elapsed without data.
    fn read_byte(&mut self) -> impl Future<Output = Result<Option<u8>, SerialError>>;
}

/// Why the assembler finished a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineEnd {
    /// The delimiter arrived.
    Delimiter,
    /// The buffer reached its bound before a delimiter.
    Overflow,
}

/// Fixed-size line accumulator.
///
/// Holds at most `N - 1` bytes; the delimiter itself is never stored.
#[derive(Debug)]
pub struct LineAssembler<const N: usize = LINE_BUFFER_SIZE> {
    buffer: Vec<u8, N>,
    skipping: bool,
}

impl<const N: usize> LineAssembler<N> {
    /// Longest line kept intact.
    pub const MAX_LINE: usize = N - 1;

    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            skipping: false,
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Some` when a line is complete; read it with [`line`] and
    /// then call [`clear`] before feeding more bytes.
    ///
    /// [`line`]: Self::line
    /// [`clear`]: Self::clear
    pub fn push(&mut self, byte: u8) -> Option<LineEnd> {
        if self.skipping {
            if byte == LINE_DELIMITER {
                self.skipping = false;
            }
            return None;
        }

        if byte == LINE_DELIMITER {
            return Some(LineEnd::Delimiter);
        }

        // Cannot fail: the line is cut before the buffer fills.
        let _ = self.buffer.push(byte);
        if self.buffer.len() >= Self::MAX_LINE {
            Some(LineEnd::Overflow)
        } else {
            None
        }
    }

    /// Bytes accumulated so far.
    #[inline]
    #[must_use]
    pub fn line(&self) -> &[u8] {
        &self.buffer
    }

    /// Reset the accumulation index.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Clear, then ignore input up to and including the next delimiter.
    pub fn skip_to_delimiter(&mut self) {
        self.buffer.clear();
        self.skipping = true;
    }

    #[inline]
    #[must_use]
    pub fn is_skipping(&self) -> bool {
        self.skipping
    }
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one reader step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadOutcome {
    /// The read timed out; nothing was appended.
    Idle,
    /// A byte was appended; the line is not complete yet.
    Pending,
    /// A completed line was queued.
    Queued,
    /// A completed line was not queued.
    Dropped(RecordError),
    /// The port reported an error; the byte (if any) is lost.
    Error(SerialError),
}

/// First pipeline stage.
pub struct SerialLineReader<'a, P, M: RawMutex, const N: usize = LINE_BUFFER_SIZE> {
    port: P,
    assembler: LineAssembler<N>,
    queue: &'a RawLineQueue<M>,
    stats: &'a GatewayStats,
    policy: TruncationPolicy,
}

impl<'a, P: SerialPort, M: RawMutex, const N: usize> SerialLineReader<'a, P, M, N> {
    /// Create a reader that forwards truncated lines.
    pub fn new(port: P, queue: &'a RawLineQueue<M>, stats: &'a GatewayStats) -> Self {
        Self::with_policy(port, queue, stats, TruncationPolicy::Forward)
    }

    /// Create a reader with an explicit overflow policy.
    pub fn with_policy(
        port: P,
        queue: &'a RawLineQueue<M>,
        stats: &'a GatewayStats,
        policy: TruncationPolicy,
    ) -> Self {
        Self {
            port,
            assembler: LineAssembler::new(),
            queue,
            stats,
            policy,
        }
    }

    /// Read forever.
    pub async fn run(&mut self) -> ! {
        loop {
            let _ = self.step().await;
        }
    }

    /// Read one byte and act on it.
    ///
    /// Returns the outcome for testing purposes.
    pub async fn step(&mut self) -> ReadOutcome {
        let byte = match self.port.read_byte().await {
            Ok(Some(byte)) => byte,
            Ok(None) => return ReadOutcome::Idle,
            Err(e) => {
                warn!("serial read error: {:?}", e);
                return ReadOutcome::Error(e);
            }
        };

        match self.assembler.push(byte) {
            None => ReadOutcome::Pending,
            Some(end) => {
                let outcome = self.forward(end);
                if end == LineEnd::Overflow && self.policy == TruncationPolicy::Discard {
                    self.assembler.skip_to_delimiter();
                } else {
                    self.assembler.clear();
                }
                outcome
            }
        }
    }

    fn forward(&self, end: LineEnd) -> ReadOutcome {
        let bytes = self.assembler.line();

        if end == LineEnd::Overflow {
            self.stats.count(StatEvent::LineTruncated);
            if self.policy == TruncationPolicy::Discard {
                warn!("serial line exceeds {} bytes, discarding", N - 1);
                return ReadOutcome::Dropped(RecordError::Truncated);
            }
        }

        info!("UART RAW: {}", printable(bytes));
        self.stats.count(StatEvent::LineRead);

        let line = match RawLine::try_copy(bytes) {
            Ok(line) => line,
            Err(e) => {
                self.stats.count(StatEvent::AllocFailure);
                debug!("skipping serial line: {}", e);
                return ReadOutcome::Dropped(e);
            }
        };

        match self.queue.try_enqueue(line) {
            Ok(()) => ReadOutcome::Queued,
            Err(_rejected) => {
                self.stats.count(StatEvent::RawDropped);
                warn!("uart_queue full, dropping");
                ReadOutcome::Dropped(RecordError::QueueFull)
            }
        }
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::collections::VecDeque;
    use std::vec::Vec as StdVec;

    struct MockPort {
        reads: VecDeque<Result<Option<u8>, SerialError>>,
    }

    impl MockPort {
        fn bytes(data: &[u8]) -> Self {
            Self {
                reads: data.iter().map(|&b| Ok(Some(b))).collect(),
            }
        }

        fn script(reads: StdVec<Result<Option<u8>, SerialError>>) -> Self {
            Self {
                reads: reads.into(),
            }
        }

        fn is_drained(&self) -> bool {
            self.reads.is_empty()
        }
    }

    impl SerialPort for MockPort {
        fn read_byte(&mut self) -> impl Future<Output = Result<Option<u8>, SerialError>> {
            core::future::ready(self.reads.pop_front().unwrap_or(Ok(None)))
        }
    }

    fn drain<const N: usize>(
        reader: &mut SerialLineReader<'_, MockPort, NoopRawMutex, N>,
    ) -> StdVec<ReadOutcome> {
        let mut outcomes = StdVec::new();
        while !reader.port().is_drained() {
            outcomes.push(block_on(reader.step()));
        }
        outcomes
    }

    fn queued_lines(queue: &RawLineQueue<NoopRawMutex>) -> StdVec<StdVec<u8>> {
        let mut lines = StdVec::new();
        while let Some(line) = queue.try_dequeue() {
            lines.push(line.as_bytes().to_vec());
        }
        lines
    }

    #[test]
    fn test_assembler_strips_delimiter() {
        let mut assembler: LineAssembler<16> = LineAssembler::new();
        for &b in b"abc" {
            assert_eq!(assembler.push(b), None);
        }
        assert_eq!(assembler.push(b'\n'), Some(LineEnd::Delimiter));
        assert_eq!(assembler.line(), b"abc");
        assembler.clear();
        assert!(assembler.line().is_empty());
    }

    #[test]
    fn test_assembler_cuts_at_capacity_minus_one() {
        let mut assembler: LineAssembler<4> = LineAssembler::new();
        assert_eq!(assembler.push(b'a'), None);
        assert_eq!(assembler.push(b'b'), None);
        assert_eq!(assembler.push(b'c'), Some(LineEnd::Overflow));
        assert_eq!(assembler.line(), b"abc");
    }

    #[test]
    fn test_assembler_skips_to_delimiter() {
        let mut assembler: LineAssembler<4> = LineAssembler::new();
        assembler.skip_to_delimiter();
        assert_eq!(assembler.push(b'x'), None);
        assert_eq!(assembler.push(b'\n'), None);
        assert!(!assembler.is_skipping());
        assert_eq!(assembler.push(b'y'), None);
        assert_eq!(assembler.line(), b"y");
    }

    #[test]
    fn test_lines_queued_in_order() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::bytes(b"{\"id\":1}\n{\"id\":2}\n");
        let mut reader: SerialLineReader<'_, _, _> = SerialLineReader::new(port, &queue, &stats);

        let outcomes = drain(&mut reader);
        assert_eq!(
            outcomes.iter().filter(|o| **o == ReadOutcome::Queued).count(),
            2
        );
        assert_eq!(
            queued_lines(&queue),
            [b"{\"id\":1}".to_vec(), b"{\"id\":2}".to_vec()]
        );
        assert_eq!(stats.snapshot().lines_read, 2);
    }

    #[test]
    fn test_timeout_appends_nothing() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::script(std::vec![
            Ok(Some(b'a')),
            Ok(None),
            Ok(Some(b'b')),
            Ok(None),
            Ok(Some(b'\n')),
        ]);
        let mut reader: SerialLineReader<'_, _, _> = SerialLineReader::new(port, &queue, &stats);

        let outcomes = drain(&mut reader);
        assert_eq!(outcomes[1], ReadOutcome::Idle);
        assert_eq!(outcomes[4], ReadOutcome::Queued);
        assert_eq!(queued_lines(&queue), [b"ab".to_vec()]);
    }

    #[test]
    fn test_serial_error_is_not_fatal() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::script(std::vec![
            Ok(Some(b'o')),
            Err(SerialError::Framing),
            Ok(Some(b'k')),
            Ok(Some(b'\n')),
        ]);
        let mut reader: SerialLineReader<'_, _, _> = SerialLineReader::new(port, &queue, &stats);

        let outcomes = drain(&mut reader);
        assert_eq!(outcomes[1], ReadOutcome::Error(SerialError::Framing));
        assert_eq!(queued_lines(&queue), [b"ok".to_vec()]);
    }

    #[test]
    fn test_overflow_forwards_prefix_and_restarts() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::bytes(b"abcdefg\n");
        let mut reader: SerialLineReader<'_, _, _, 4> = SerialLineReader::new(port, &queue, &stats);

        drain(&mut reader);
        assert_eq!(
            queued_lines(&queue),
            [b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]
        );
        assert_eq!(stats.snapshot().lines_truncated, 2);
    }

    #[test]
    fn test_overflow_discard_policy_skips_rest_of_line() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::bytes(b"abcdefg\nok\n");
        let mut reader: SerialLineReader<'_, _, _, 4> =
            SerialLineReader::with_policy(port, &queue, &stats, TruncationPolicy::Discard);

        let outcomes = drain(&mut reader);
        assert!(outcomes.contains(&ReadOutcome::Dropped(RecordError::Truncated)));
        assert_eq!(queued_lines(&queue), [b"ok".to_vec()]);
    }

    #[test]
    fn test_full_queue_drops_line() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let mut input = StdVec::new();
        for _ in 0..18 {
            input.extend_from_slice(b"x\n");
        }
        let port = MockPort::bytes(&input);
        let mut reader: SerialLineReader<'_, _, _> = SerialLineReader::new(port, &queue, &stats);

        let outcomes = drain(&mut reader);
        let dropped = outcomes
            .iter()
            .filter(|o| **o == ReadOutcome::Dropped(RecordError::QueueFull))
            .count();
        assert_eq!(dropped, 2);
        assert_eq!(queue.len(), 16);
        assert_eq!(stats.snapshot().raw_dropped, 2);
    }

    #[test]
    fn test_nul_bytes_end_the_record() {
        let queue = RawLineQueue::<NoopRawMutex>::new();
        let stats = GatewayStats::new();
        let port = MockPort::bytes(b"ab\0cd\n");
        let mut reader: SerialLineReader<'_, _, _> = SerialLineReader::new(port, &queue, &stats);

        drain(&mut reader);
        assert_eq!(queued_lines(&queue), [b"ab".to_vec()]);
    }
}
