//! Owned records flowing through the pipeline.
//!
//! Both record types own their heap allocation; moving one into a queue
//! transfers ownership and dropping it anywhere frees it, so every exit path
//! releases the buffer exactly once.

use alloc::string::String;
use alloc::vec::Vec;

/// Error type for per-record failures.
///
/// None of these are fatal: the affected record is dropped and the pipeline
/// carries on with the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    /// The record is not valid structured text.
    Malformed,
    /// The downstream queue was full; the record was dropped.
    QueueFull,
    /// The record buffer could not be allocated.
    OutOfMemory,
    /// The line overflowed the serial buffer and the policy discards it.
    Truncated,
}

impl core::fmt::Display for RecordError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed record"),
            Self::QueueFull => write!(f, "queue full"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Truncated => write!(f, "truncated record"),
        }
    }
}

/// One serial record, delimiter stripped, never containing a NUL byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    bytes: Vec<u8>,
}

impl RawLine {
    /// Copy `src` into a new heap buffer.
    ///
    /// Copying stops at the first NUL byte. Allocation failure is reported
    /// instead of aborting, so the caller can skip the record.
    pub fn try_copy(src: &[u8]) -> Result<Self, RecordError> {
        let len = src.iter().position(|&b| b == 0).unwrap_or(src.len());
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| RecordError::OutOfMemory)?;
        bytes.extend_from_slice(&src[..len]);
        Ok(Self { bytes })
    }

    /// The record content.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Canonical (minimized) text of a record that parsed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMessage {
    text: String,
}

impl ValidatedMessage {
    pub(crate) fn new(text: String) -> Self {
        Self { text }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The broker payload.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Take the canonical text out of the message.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

/// Bytes as text for log lines.
#[inline]
pub(crate) fn printable(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("<non-utf8>")
}
