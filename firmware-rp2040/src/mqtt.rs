//! MQTT client task and the broker session handles the pipeline sees.
//!
//! The client, its TCP socket and buffers live inside [`MqttTask`]. The
//! lifecycle and the publisher talk to it through [`MqttChannels`]:
//! [`MqttConnector`] asks for a session to be opened or closed, and
//! [`MqttSession`] sends publish requests and waits for the matching reply.
//!
//! Once a session is requested the task keeps it up on its own: a refused
//! connection or a lost one is retried after [`MQTT_RECONNECT_DELAY`] until
//! the session is closed. Publishes made while it is down fail with
//! `NotConnected`.
//!
//! Replies go through a [`ReplySlot`], whose sequence numbers never repeat
//! across sessions, so a reply to a publish that was cancelled by a teardown
//! is never mistaken for a later one.

use crate::config::{
    broker_endpoint, MQTT_CLIENT_ID, MQTT_COMMAND_QUEUE_DEPTH, MQTT_KEEP_ALIVE_SECS,
    MQTT_PASSWORD, MQTT_PING_INTERVAL, MQTT_RECONNECT_DELAY, MQTT_SOCKET_TIMEOUT, MQTT_USERNAME,
};
use alloc::vec::Vec;
use defmt::{debug, info, warn, Debug2Format};
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_deadline, with_timeout, Instant};
use gateway_core::config::LINE_BUFFER_SIZE;
use gateway_core::{
    BrokerConnector, BrokerError, BrokerEvent, BrokerSession, MessageId, NetworkEvent,
    NetworkEvents, PublishError, QoS, ReplySlot, Topic,
};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

/// Room for the largest record plus topic and packet header.
const MQTT_BUFFER_LEN: usize = LINE_BUFFER_SIZE + 512;
const TCP_RX_BUFFER_LEN: usize = 1024;
const MAX_PROPERTIES: usize = 5;

/// One publish handed to the client task.
struct PublishRequest {
    seq: u32,
    topic: Topic,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
}

enum MqttCommand {
    Connect,
    Publish(PublishRequest),
    Disconnect,
}

/// Request and reply paths between the pipeline and [`MqttTask`].
pub struct MqttChannels {
    commands: Channel<CriticalSectionRawMutex, MqttCommand, MQTT_COMMAND_QUEUE_DEPTH>,
    replies: ReplySlot<CriticalSectionRawMutex, Result<MessageId, PublishError>>,
}

impl MqttChannels {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            replies: ReplySlot::new(),
        }
    }
}

impl Default for MqttChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BrokerConnector`] given to the lifecycle.
pub struct MqttConnector {
    channels: &'static MqttChannels,
}

impl MqttConnector {
    pub fn new(channels: &'static MqttChannels) -> Self {
        Self { channels }
    }
}

impl BrokerConnector for MqttConnector {
    type Session = MqttSession;

    /// Ask the client task for a session. Returns without waiting for the
    /// broker; only a bad broker address fails here.
    async fn start(&mut self) -> Result<MqttSession, BrokerError> {
        broker_endpoint()?;
        self.channels.replies.clear();
        self.channels.commands.send(MqttCommand::Connect).await;
        Ok(MqttSession {
            channels: self.channels,
        })
    }

    async fn stop(&mut self, _session: MqttSession) {
        self.channels.commands.send(MqttCommand::Disconnect).await;
    }
}

/// Handle to a started session.
pub struct MqttSession {
    channels: &'static MqttChannels,
}

impl BrokerSession for MqttSession {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, PublishError> {
        let seq = self.channels.replies.next_seq();

        let mut owned_topic = Topic::new();
        owned_topic
            .push_str(topic)
            .map_err(|_| PublishError::Rejected)?;

        let mut owned_payload = Vec::new();
        if owned_payload.try_reserve_exact(payload.len()).is_err() {
            debug!("out of memory, skipping publish");
            return Err(PublishError::Rejected);
        }
        owned_payload.extend_from_slice(payload);

        self.channels
            .commands
            .send(MqttCommand::Publish(PublishRequest {
                seq,
                topic: owned_topic,
                payload: owned_payload,
                qos,
                retain,
            }))
            .await;

        self.channels.replies.wait(seq).await
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// No session wanted; wait for a connect request.
    Idle,
    /// Attempt a session now.
    Connect,
    /// The last attempt was refused or the session was lost; wait, then
    /// attempt again.
    Retry,
}

enum SessionEnd {
    Refused,
    Stopped,
    Lost,
}

fn to_quality_of_service(qos: QoS) -> QualityOfService {
    match qos {
        QoS::AtMostOnce => QualityOfService::QoS0,
        QoS::AtLeastOnce => QualityOfService::QoS1,
        QoS::ExactlyOnce => QualityOfService::QoS2,
    }
}

fn reason_to_publish_error(code: &ReasonCode) -> PublishError {
    match code {
        ReasonCode::NetworkError => PublishError::Io,
        _ => PublishError::Rejected,
    }
}

/// Owner of the broker connection.
pub struct MqttTask {
    stack: Stack<'static>,
    channels: &'static MqttChannels,
    events: &'static NetworkEvents<CriticalSectionRawMutex>,
    next_message_id: u16,
}

impl MqttTask {
    pub fn new(
        stack: Stack<'static>,
        channels: &'static MqttChannels,
        events: &'static NetworkEvents<CriticalSectionRawMutex>,
    ) -> Self {
        Self {
            stack,
            channels,
            events,
            next_message_id: 0,
        }
    }

    /// Serve session and publish requests forever.
    pub async fn run(mut self) -> ! {
        let mut tcp_rx = [0u8; TCP_RX_BUFFER_LEN];
        let mut tcp_tx = [0u8; MQTT_BUFFER_LEN];
        let mut mqtt_tx = [0u8; MQTT_BUFFER_LEN];
        let mut mqtt_rx = [0u8; MQTT_BUFFER_LEN];
        let mut mode = Mode::Idle;

        loop {
            match mode {
                Mode::Idle => {
                    self.wait_for_connect().await;
                    mode = Mode::Connect;
                }
                Mode::Retry => {
                    mode = self.pause_before_retry().await;
                    if mode != Mode::Connect {
                        continue;
                    }
                }
                Mode::Connect => {}
            }

            mode = match self
                .session(&mut tcp_rx, &mut tcp_tx, &mut mqtt_tx, &mut mqtt_rx)
                .await
            {
                SessionEnd::Refused => Mode::Retry,
                SessionEnd::Stopped => Mode::Idle,
                SessionEnd::Lost => {
                    self.broker_event(BrokerEvent::Disconnected);
                    Mode::Retry
                }
            };
        }
    }

    fn broker_event(&self, event: BrokerEvent) {
        if !self.events.try_post(NetworkEvent::Broker(event)) {
            debug!("event queue full, dropping broker event");
        }
    }

    fn refuse_publish(&self, request: PublishRequest) {
        self.channels
            .replies
            .reply(request.seq, Err(PublishError::NotConnected));
    }

    async fn wait_for_connect(&mut self) {
        loop {
            match self.channels.commands.receive().await {
                MqttCommand::Connect => return,
                MqttCommand::Publish(request) => self.refuse_publish(request),
                MqttCommand::Disconnect => {}
            }
        }
    }

    /// Wait out the reconnect delay, still answering requests.
    async fn pause_before_retry(&mut self) -> Mode {
        let deadline = Instant::now() + MQTT_RECONNECT_DELAY;
        loop {
            match with_deadline(deadline, self.channels.commands.receive()).await {
                Err(_timeout) => return Mode::Connect,
                Ok(MqttCommand::Connect) => return Mode::Connect,
                Ok(MqttCommand::Disconnect) => return Mode::Idle,
                Ok(MqttCommand::Publish(request)) => self.refuse_publish(request),
            }
        }
    }

    async fn session(
        &mut self,
        tcp_rx: &mut [u8],
        tcp_tx: &mut [u8],
        mqtt_tx: &mut [u8],
        mqtt_rx: &mut [u8],
    ) -> SessionEnd {
        let (address, port) = match broker_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("broker endpoint: {}", e);
                return SessionEnd::Refused;
            }
        };

        let mut socket = TcpSocket::new(self.stack, tcp_rx, tcp_tx);
        socket.set_timeout(Some(MQTT_SOCKET_TIMEOUT));
        if let Err(e) = socket.connect((address, port)).await {
            warn!("broker TCP connect failed: {:?}", e);
            return SessionEnd::Refused;
        }

        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        config.add_client_id(MQTT_CLIENT_ID);
        config.keep_alive = MQTT_KEEP_ALIVE_SECS;
        config.max_packet_size = MQTT_BUFFER_LEN as u32;
        if !MQTT_USERNAME.is_empty() {
            config.add_username(MQTT_USERNAME);
            config.add_password(MQTT_PASSWORD);
        }

        let mqtt_tx_len = mqtt_tx.len();
        let mqtt_rx_len = mqtt_rx.len();
        let mut client = MqttClient::<_, MAX_PROPERTIES, _>::new(
            socket,
            mqtt_tx,
            mqtt_tx_len,
            mqtt_rx,
            mqtt_rx_len,
            config,
        );

        if let Err(code) = client.connect_to_broker().await {
            warn!("MQTT CONNECT refused: {:?}", Debug2Format(&code));
            return SessionEnd::Refused;
        }

        self.next_message_id = 0;
        self.broker_event(BrokerEvent::Connected);

        loop {
            let command =
                match with_timeout(MQTT_PING_INTERVAL, self.channels.commands.receive()).await {
                    Ok(command) => command,
                    Err(_idle) => {
                        if let Err(code) = client.send_ping().await {
                            warn!("MQTT ping failed: {:?}", Debug2Format(&code));
                            return SessionEnd::Lost;
                        }
                        continue;
                    }
                };

            match command {
                MqttCommand::Publish(request) => {
                    self.next_message_id = self.next_message_id.wrapping_add(1);
                    let id = MessageId(self.next_message_id);
                    let outcome = client
                        .send_message(
                            &request.topic,
                            &request.payload,
                            to_quality_of_service(request.qos),
                            request.retain,
                        )
                        .await
                        .map(|()| id)
                        .map_err(|code| reason_to_publish_error(&code));

                    self.channels.replies.reply(request.seq, outcome);
                    if outcome == Err(PublishError::Io) {
                        return SessionEnd::Lost;
                    }
                }
                MqttCommand::Connect => debug!("MQTT session already up"),
                MqttCommand::Disconnect => {
                    if let Err(code) = client.disconnect().await {
                        debug!("MQTT DISCONNECT failed: {:?}", Debug2Format(&code));
                    }
                    info!("MQTT session closed");
                    return SessionEnd::Stopped;
                }
            }
        }
    }
}

