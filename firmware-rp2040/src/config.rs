//! Board and network configuration.
//!
//! Credentials and broker address are baked in at build time from the
//! environment, e.g.
//!
//! ```text
//! WIFI_SSID=lab WIFI_PASSWORD=secret MQTT_BROKER_IP=192.168.1.10 cargo run --release
//! ```
//!
//! They are read once at startup and never change while the gateway runs.

use core::str::FromStr;
use embassy_net::Ipv4Address;
use embassy_time::Duration;
use gateway_core::config::{LINE_BUFFER_SIZE, QUEUE_CAPACITY};
use gateway_core::BrokerError;

/// Serial link to the sensor board (UART1, 8N1).
pub const UART_BAUD_RATE: u32 = 115_200;

pub const WIFI_SSID: &str = env_or(option_env!("WIFI_SSID"), "");
pub const WIFI_PASSWORD: &str = env_or(option_env!("WIFI_PASSWORD"), "");

const MQTT_BROKER_IP: &str = env_or(option_env!("MQTT_BROKER_IP"), "192.168.1.10");
const MQTT_BROKER_PORT: &str = env_or(option_env!("MQTT_BROKER_PORT"), "1883");

pub const MQTT_CLIENT_ID: &str = env_or(option_env!("MQTT_CLIENT_ID"), "sensor-gateway");

/// Broker credentials; empty means anonymous.
pub const MQTT_USERNAME: &str = env_or(option_env!("MQTT_USERNAME"), "");
pub const MQTT_PASSWORD: &str = env_or(option_env!("MQTT_PASSWORD"), "");

/// MQTT keep-alive advertised to the broker.
pub const MQTT_KEEP_ALIVE_SECS: u16 = 60;

/// Idle time after which the client pings the broker.
pub const MQTT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before the client re-establishes a session the broker dropped.
pub const MQTT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Timeout on TCP reads and writes to the broker.
pub const MQTT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between stats log lines.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Publish requests the MQTT task can have queued.
pub const MQTT_COMMAND_QUEUE_DEPTH: usize = 4;

/// Heap backing raw lines, validated messages and publish copies.
pub const HEAP_SIZE: usize = 96 * 1024;

/// Records alive at once in the worst case: both pipeline queues full, one
/// record held by each of the reader, validator (input and output) and
/// publisher (message and its copy), and a full MQTT command queue.
/// Records are streamed while parsed, so nothing else grows with input.
const LIVE_RECORDS_MAX: usize = 2 * QUEUE_CAPACITY + 5 + MQTT_COMMAND_QUEUE_DEPTH;

/// Allocator bookkeeping per block, rounded up.
const ALLOC_OVERHEAD: usize = 16;

const _: () = assert!(LIVE_RECORDS_MAX * (LINE_BUFFER_SIZE + ALLOC_OVERHEAD) <= HEAP_SIZE);

const fn env_or(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(value) => value,
        None => default,
    }
}

/// Broker address and port.
pub fn broker_endpoint() -> Result<(Ipv4Address, u16), BrokerError> {
    let address = Ipv4Address::from_str(MQTT_BROKER_IP).map_err(|_| BrokerError::Dns)?;
    let port = MQTT_BROKER_PORT.parse().map_err(|_| BrokerError::Dns)?;
    Ok((address, port))
}
