//! Serial-to-MQTT sensor gateway for the Raspberry Pi Pico W.
//!
//! Reads newline-delimited sensor records from UART, validates them and
//! publishes them to an MQTT broker over the on-board CYW43439 Wi-Fi radio.
//! The pipeline itself lives in [`gateway_core`]; this crate provides the
//! hardware behind its traits.
//!
//! # Hardware Configuration
//!
//! | Function | GPIO | Description |
//! |----------|------|-------------|
//! | UART1 TX | 8    | Serial transmit (unused) |
//! | UART1 RX | 9    | Sensor record input |
//! | WL_ON    | 23   | Radio power |
//! | WL_D     | 24   | Radio SPI data |
//! | WL_CS    | 25   | Radio SPI chip select |
//! | WL_CLK   | 29   | Radio SPI clock |
//!
//! # Architecture
//!
//! Pipeline tasks run at fixed priorities, highest first:
//!
//! - **Reader** (interrupt executor, high): UART bytes to raw lines
//! - **Validator** (interrupt executor, medium): raw lines to canonical messages
//! - **Publisher** (thread executor): canonical messages to the broker
//!
//! The lifecycle, Wi-Fi, MQTT client and network stack tasks share the thread
//! executor with the publisher.
//!
//! # Modules
//!
//! - [`uart_input`]: UART byte source ([`UartSerialPort`])
//! - [`wifi`]: station driver ([`WifiTask`], [`CywWifi`])
//! - [`mqtt`]: broker client ([`MqttTask`], [`MqttConnector`], [`MqttSession`])
//! - [`config`]: build-time credentials and board constants
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent watchdog reset)
//! - **`discard-truncated`**: Drop over-long serial lines instead of forwarding their prefix

#![no_std]

extern crate alloc;

#[cfg(all(feature = "dev-panic", feature = "prod-panic"))]
compile_error!("Cannot enable both `dev-panic` and `prod-panic` features");

// Re-export core types for convenience
pub use gateway_core::{
    BrokerLink, GatewayStats, MessageQueue, NetworkEvents, NetworkLifecycle, Publisher,
    RawLineQueue, RecordValidator, SerialLineReader, StatsSnapshot, TopicRouter,
    TruncationPolicy,
};

pub mod config;
pub mod mqtt;
pub mod uart_input;
pub mod wifi;

pub use mqtt::{MqttChannels, MqttConnector, MqttSession, MqttTask};
pub use uart_input::UartSerialPort;
pub use wifi::{CywWifi, WifiRequests, WifiTask};
