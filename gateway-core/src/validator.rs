//! Record validation: raw lines in, canonical messages out.
//!
//! Records are re-serialized while they are parsed, without building a
//! document tree, so validating a record costs one allocation the size of the
//! record. Object members keep their document order.

use crate::queue::{MessageQueue, RawLineQueue};
use crate::record::{printable, RawLine, RecordError, ValidatedMessage};
use crate::stats::{GatewayStats, StatEvent};
use alloc::string::String;
use core::fmt::{self, Write};
use embassy_sync::blocking_mutex::raw::RawMutex;
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Serialize;

/// Parse `raw` as JSON and re-serialize it without whitespace.
///
/// Any JSON value is accepted, not just objects. Trailing content after the
/// value (other than whitespace) is rejected. The output buffer is reserved
/// fallibly, so a short heap yields [`RecordError::OutOfMemory`].
pub fn canonicalize(raw: &[u8]) -> Result<ValidatedMessage, RecordError> {
    let mut text = String::new();
    text.try_reserve_exact(raw.len())
        .map_err(|_| RecordError::OutOfMemory)?;

    let mut deserializer = serde_json::Deserializer::from_slice(raw);
    Canonical { out: &mut text }
        .deserialize(&mut deserializer)
        .map_err(|_| RecordError::Malformed)?;
    deserializer.end().map_err(|_| RecordError::Malformed)?;

    Ok(ValidatedMessage::new(text))
}

/// Writes one JSON value into `out` in compact form as it is parsed.
struct Canonical<'o> {
    out: &'o mut String,
}

impl Canonical<'_> {
    fn scalar<T, E>(self, value: &T) -> Result<(), E>
    where
        T: Serialize + ?Sized,
        E: de::Error,
    {
        let text = serde_json::to_string(value).map_err(E::custom)?;
        self.out.push_str(&text);
        Ok(())
    }
}

impl<'de> DeserializeSeed<'de> for Canonical<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for Canonical<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        self.out.push_str("null");
        Ok(())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<(), E> {
        self.out.push_str(if v { "true" } else { "false" });
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<(), E> {
        write!(self.out, "{}", v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<(), E> {
        write!(self.out, "{}", v).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<(), E> {
        self.scalar(&v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<(), E> {
        self.scalar(v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let out = self.out;
        out.push('[');
        let mut first = true;
        loop {
            let mark = out.len();
            if !first {
                out.push(',');
            }
            if seq.next_element_seed(Canonical { out: &mut *out })?.is_none() {
                out.truncate(mark);
                break;
            }
            first = false;
        }
        out.push(']');
        Ok(())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let out = self.out;
        out.push('{');
        let mut first = true;
        loop {
            let mark = out.len();
            if !first {
                out.push(',');
            }
            if map.next_key_seed(Canonical { out: &mut *out })?.is_none() {
                out.truncate(mark);
                break;
            }
            out.push(':');
            map.next_value_seed(Canonical { out: &mut *out })?;
            first = false;
        }
        out.push('}');
        Ok(())
    }
}

/// Second pipeline stage.
pub struct RecordValidator<'a, M: RawMutex> {
    input: &'a RawLineQueue<M>,
    output: &'a MessageQueue<M>,
    stats: &'a GatewayStats,
}

impl<'a, M: RawMutex> RecordValidator<'a, M> {
    pub fn new(
        input: &'a RawLineQueue<M>,
        output: &'a MessageQueue<M>,
        stats: &'a GatewayStats,
    ) -> Self {
        Self {
            input,
            output,
            stats,
        }
    }

    /// Validate forever.
    pub async fn run(&mut self) -> ! {
        loop {
            let _ = self.process_one().await;
        }
    }

    /// Wait for one raw line and validate it.
    ///
    /// Returns the result of the operation for testing purposes.
    pub async fn process_one(&mut self) -> Result<(), RecordError> {
        let raw = self.input.dequeue().await;
        self.validate(raw)
    }

    /// Validate `raw` and queue its canonical form.
    ///
    /// `raw` is consumed; it is released when this returns, on every path.
    pub fn validate(&self, raw: RawLine) -> Result<(), RecordError> {
        let message = match canonicalize(raw.as_bytes()) {
            Ok(message) => message,
            Err(RecordError::OutOfMemory) => {
                self.stats.count(StatEvent::AllocFailure);
                debug!("out of memory, skipping record");
                return Err(RecordError::OutOfMemory);
            }
            Err(e) => {
                self.stats.count(StatEvent::Malformed);
                warn!("invalid json, dropping: {}", printable(raw.as_bytes()));
                return Err(e);
            }
        };

        match self.output.try_enqueue(message) {
            Ok(()) => {
                self.stats.count(StatEvent::Validated);
                Ok(())
            }
            Err(_rejected) => {
                self.stats.count(StatEvent::MessageDropped);
                warn!("publish_queue full, dropping");
                Err(RecordError::QueueFull)
            }
        }
    }
}
