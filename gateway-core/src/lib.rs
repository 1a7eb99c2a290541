//! Platform-agnostic serial-to-MQTT sensor gateway pipeline.
//!
//! Sensor records arrive as newline-delimited text on a serial link, are
//! validated and minimized, and are published to an MQTT broker on a topic
//! derived from their content:
//!
//! ```text
//! SerialPort -> SerialLineReader -> RawLineQueue -> RecordValidator
//!            -> MessageQueue -> Publisher -> BrokerLink -> BrokerSession
//! ```
//!
//! [`NetworkLifecycle`] runs beside the pipeline and is the only writer of
//! the broker session slot in [`BrokerLink`].
//!
//! Hardware stays behind the [`SerialPort`], [`WifiControl`],
//! [`BrokerConnector`] and [`BrokerSession`] traits, so every stage runs
//! under host tests with mocks. Queues and the session gate are generic over
//! a `RawMutex`: `CriticalSectionRawMutex` when stages run on different
//! executors, `NoopRawMutex` in tests.
//!
//! # Features
//!
//! - **`std`**: host builds
//! - **`defmt`**: log through `defmt`
//! - **`log`**: log through the `log` facade

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// Must come first so the logging macros are visible to later modules.
mod fmt;

pub mod broker;
pub mod config;
pub mod network;
pub mod publisher;
pub mod queue;
pub mod record;
pub mod reply;
pub mod serial;
pub mod stats;
pub mod topic;
pub mod validator;

pub use broker::{
    BrokerConnector, BrokerError, BrokerLink, BrokerSession, BrokerState, MessageId, PublishError,
    QoS,
};
pub use config::{TopicScheme, TruncationPolicy};
pub use network::{
    BrokerEvent, LinkError, NetworkEvent, NetworkEvents, NetworkLifecycle, NetworkState,
    WifiControl,
};
pub use publisher::Publisher;
pub use queue::{BoundedRecordQueue, MessageQueue, RawLineQueue, Rejected};
pub use record::{RawLine, RecordError, ValidatedMessage};
pub use reply::ReplySlot;
pub use serial::{LineAssembler, LineEnd, ReadOutcome, SerialError, SerialLineReader, SerialPort};
pub use stats::{GatewayStats, StatsSnapshot};
pub use topic::{topic_for, Topic, TopicRouter, TopicSelector};
pub use validator::{canonicalize, RecordValidator};
