//! Network lifecycle actor.
//!
//! Driver callbacks become [`NetworkEvent`]s posted into [`NetworkEvents`];
//! a single [`NetworkLifecycle`] task consumes them and is the only writer
//! of the network state and of the broker session slot.
//!
//! ```text
//! Disconnected --Started--> Connecting --IpAcquired--> Connected
//!       ^                       ^                          |
//!       |                       +------Disconnected--------+
//!       +--(connect error, retried on next Disconnected)
//! ```
//!
//! Reconnection is unconditional and immediate; there is no backoff and no
//! terminal state. An address reported before the network has started is
//! ignored. A broker session that fails to start is retried up to
//! [`SESSION_START_ATTEMPTS`] times, and again on every later `IpAcquired`
//! while the session is still stopped.

use crate::broker::{BrokerConnector, BrokerLink, BrokerState};
use crate::config::{EVENT_QUEUE_CAPACITY, SESSION_START_ATTEMPTS};
use crate::stats::{GatewayStats, StatEvent};
use core::future::Future;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

/// Wireless link state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Broker client notifications. Logged only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    /// An inbound message; only its size is kept.
    Message { topic_len: usize, payload_len: usize },
}

/// Notification from the network or broker driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkEvent {
    /// The network subsystem is up and can attempt a connection.
    Started,
    /// The wireless link dropped.
    Disconnected,
    /// The interface got an IPv4 address.
    IpAcquired([u8; 4]),
    Broker(BrokerEvent),
}

/// Error type for wireless control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The association attempt failed.
    Join,
    /// The radio is not initialized yet.
    NotReady,
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Join => write!(f, "join failed"),
            Self::NotReady => write!(f, "radio not ready"),
        }
    }
}

/// Wireless driver seam.
pub trait WifiControl {
    /// Start an association attempt.
    ///
    /// The outcome arrives later as a [`NetworkEvent`].
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>>;
}

/// Event queue feeding the lifecycle actor.
pub struct NetworkEvents<M: RawMutex> {
    channel: Channel<M, NetworkEvent, EVENT_QUEUE_CAPACITY>,
}

impl<M: RawMutex> NetworkEvents<M> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Post an event, waiting for room.
    pub async fn post(&self, event: NetworkEvent) {
        self.channel.send(event).await;
    }

    /// Post an event without waiting.
    ///
    /// Returns `false` if the queue was full and the event was dropped.
    pub fn try_post(&self, event: NetworkEvent) -> bool {
        self.channel.try_send(event).is_ok()
    }

    /// Wait for the next event.
    pub async fn next(&self) -> NetworkEvent {
        self.channel.receive().await
    }
}

impl<M: RawMutex> Default for NetworkEvents<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The lifecycle actor.
pub struct NetworkLifecycle<'a, M: RawMutex, W, C: BrokerConnector> {
    events: &'a NetworkEvents<M>,
    link: &'a BrokerLink<M, C::Session>,
    wifi: W,
    connector: C,
    state: NetworkState,
    stats: &'a GatewayStats,
}

impl<'a, M, W, C> NetworkLifecycle<'a, M, W, C>
where
    M: RawMutex,
    W: WifiControl,
    C: BrokerConnector,
{
    pub fn new(
        events: &'a NetworkEvents<M>,
        link: &'a BrokerLink<M, C::Session>,
        wifi: W,
        connector: C,
        stats: &'a GatewayStats,
    ) -> Self {
        Self {
            events,
            link,
            wifi,
            connector,
            state: NetworkState::Disconnected,
            stats,
        }
    }

    #[inline]
    pub fn state(&self) -> NetworkState {
        self.state
    }

    #[inline]
    pub fn broker_state(&self) -> BrokerState {
        self.link.state()
    }

    /// Handle events forever.
    pub async fn run(&mut self) -> ! {
        loop {
            let event = self.events.next().await;
            self.handle(event).await;
        }
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Started => {
                if self.state == NetworkState::Disconnected {
                    info!("network started");
                    self.begin_connect().await;
                }
            }
            NetworkEvent::Disconnected => {
                warn!("WiFi disconnected, retrying...");
                if let Some(session) = self.link.teardown().await {
                    info!("MQTT session stopped");
                    self.connector.stop(session).await;
                }
                self.stats.count(StatEvent::Reconnect);
                self.state = NetworkState::Disconnected;
                self.begin_connect().await;
            }
            NetworkEvent::IpAcquired(ip) => {
                if self.state == NetworkState::Disconnected {
                    debug!("address before network start, ignoring");
                    return;
                }
                info!("Got IP: {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
                self.state = NetworkState::Connected;
                self.start_session().await;
            }
            NetworkEvent::Broker(event) => match event {
                BrokerEvent::Connected => info!("MQTT connected"),
                BrokerEvent::Disconnected => warn!("MQTT disconnected"),
                BrokerEvent::Message {
                    topic_len,
                    payload_len,
                } => info!(
                    "MQTT incoming data: topic {} bytes, payload {} bytes",
                    topic_len, payload_len
                ),
            },
        }
    }

    async fn begin_connect(&mut self) {
        self.state = NetworkState::Connecting;
        if let Err(e) = self.wifi.connect().await {
            // The driver reports the failure as a disconnection, which
            // retries.
            warn!("WiFi connect failed: {}", e);
        }
    }

    async fn start_session(&mut self) {
        if self.link.state() == BrokerState::Started {
            debug!("MQTT session already started");
            return;
        }

        for attempt in 1..=SESSION_START_ATTEMPTS {
            match self.connector.start().await {
                Ok(session) => {
                    if let Some(stale) = self.link.install(session).await {
                        self.connector.stop(stale).await;
                    }
                    info!("MQTT session started");
                    return;
                }
                Err(e) => {
                    error!(
                        "MQTT start failed ({}/{}): {}",
                        attempt, SESSION_START_ATTEMPTS, e
                    );
                }
            }
        }
    }
}
