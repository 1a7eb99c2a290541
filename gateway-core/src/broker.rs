//! Broker session traits and the gate that guards the live session.
//!
//! The session slot is written only by the network lifecycle and read only
//! by the publisher. [`BrokerLink`] makes that hand-over race-free: a publish
//! either sees a live session for its whole duration or fails with an error,
//! and it never holds up a teardown.

use core::cell::Cell;
use core::future::Future;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// QoS 0: fire and forget.
    AtMostOnce,
    /// QoS 1: the broker may redeliver but will not drop an accepted publish.
    AtLeastOnce,
    /// QoS 2.
    ExactlyOnce,
}

/// Identifier the broker client assigned to an accepted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageId(pub u16);

/// Error type for publish attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// No broker session is started.
    NotConnected,
    /// The session was torn down while the publish was in flight.
    SessionLost,
    /// The broker refused the publish.
    Rejected,
    /// Transport error on the broker connection.
    Io,
}

impl core::fmt::Display for PublishError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "broker not connected"),
            Self::SessionLost => write!(f, "broker session lost"),
            Self::Rejected => write!(f, "publish rejected"),
            Self::Io => write!(f, "broker I/O error"),
        }
    }
}

/// Error type for starting a broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrokerError {
    /// Broker address could not be resolved.
    Dns,
    /// TCP connection to the broker failed.
    Connect,
    /// MQTT CONNECT was refused or timed out.
    Handshake,
}

impl core::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Dns => write!(f, "broker address lookup failed"),
            Self::Connect => write!(f, "broker connection failed"),
            Self::Handshake => write!(f, "broker handshake failed"),
        }
    }
}

/// Whether a broker session is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrokerState {
    #[default]
    Stopped,
    Started,
}

/// A started broker session.
pub trait BrokerSession {
    /// Publish `payload` on `topic`.
    ///
    /// Returns the message id the client assigned, or why it could not.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<MessageId, PublishError>>;
}

/// Starts and stops broker sessions.
pub trait BrokerConnector {
    type Session: BrokerSession;

    /// Open a session. Called once the network has an address.
    ///
    /// An implementation may return before the broker has accepted the
    /// connection; publishes then fail with [`PublishError::NotConnected`]
    /// until it has.
    fn start(&mut self) -> impl Future<Output = Result<Self::Session, BrokerError>>;

    /// Close a session that was torn down.
    fn stop(&mut self, session: Self::Session) -> impl Future<Output = ()>;
}

/// Slot holding the live broker session, if any.
pub struct BrokerLink<M: RawMutex, S> {
    session: Mutex<M, Option<S>>,
    state: BlockingMutex<M, Cell<BrokerState>>,
    teardown: Signal<M, ()>,
}

impl<M: RawMutex, S> BrokerLink<M, S> {
    pub const fn new() -> Self {
        Self {
            session: Mutex::new(None),
            state: BlockingMutex::new(Cell::new(BrokerState::Stopped)),
            teardown: Signal::new(),
        }
    }

    /// Current broker state.
    pub fn state(&self) -> BrokerState {
        self.state.lock(|state| state.get())
    }

    fn set_state(&self, next: BrokerState) {
        self.state.lock(|state| state.set(next));
    }

    /// Make `session` the live session.
    ///
    /// Returns the session it replaced, if one was still installed.
    pub async fn install(&self, session: S) -> Option<S> {
        let mut slot = self.session.lock().await;
        let previous = slot.replace(session);
        // Clear a teardown nobody consumed before going live again.
        self.teardown.reset();
        self.set_state(BrokerState::Started);
        previous
    }

    /// Retire the live session.
    ///
    /// The state flips to `Stopped` first, so new publishes fail at once; an
    /// in-flight publish is cancelled and has released the slot by the time
    /// the session is handed back.
    pub async fn teardown(&self) -> Option<S> {
        self.set_state(BrokerState::Stopped);
        self.teardown.signal(());
        self.session.lock().await.take()
    }
}

impl<M: RawMutex, S: BrokerSession> BrokerLink<M, S> {
    /// Publish through the live session.
    ///
    /// Fails fast with [`PublishError::NotConnected`] when no session is
    /// started or a transition holds the slot, and with
    /// [`PublishError::SessionLost`] if a teardown starts mid-publish.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, PublishError> {
        if self.state() != BrokerState::Started {
            return Err(PublishError::NotConnected);
        }
        let mut slot = self
            .session
            .try_lock()
            .map_err(|_| PublishError::NotConnected)?;
        let session = slot.as_mut().ok_or(PublishError::NotConnected)?;

        match select(
            session.publish(topic, payload, qos, retain),
            self.teardown.wait(),
        )
        .await
        {
            Either::First(outcome) => outcome,
            Either::Second(()) => Err(PublishError::SessionLost),
        }
    }
}

impl<M: RawMutex, S> Default for BrokerLink<M, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingSession {
        published: Vec<(String, Vec<u8>, QoS, bool)>,
        next_id: u16,
    }

    impl BrokerSession for RecordingSession {
        fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: QoS,
            retain: bool,
        ) -> impl Future<Output = Result<MessageId, PublishError>> {
            self.published
                .push((topic.into(), payload.to_vec(), qos, retain));
            self.next_id += 1;
            core::future::ready(Ok(MessageId(self.next_id)))
        }
    }

    /// Session whose transport never completes a publish.
    struct StalledSession;

    impl BrokerSession for StalledSession {
        async fn publish(
            &mut self,
            _topic: &str,
            _payload: &[u8],
            _qos: QoS,
            _retain: bool,
        ) -> Result<MessageId, PublishError> {
            core::future::pending().await
        }
    }

    #[test]
    fn test_publish_without_session_fails_fast() {
        let link: BrokerLink<NoopRawMutex, RecordingSession> = BrokerLink::new();
        assert_eq!(link.state(), BrokerState::Stopped);
        assert_eq!(
            block_on(link.publish("t", b"{}", QoS::AtLeastOnce, false)),
            Err(PublishError::NotConnected)
        );
    }

    #[test]
    fn test_publish_through_installed_session() {
        let link: BrokerLink<NoopRawMutex, RecordingSession> = BrokerLink::new();
        assert!(block_on(link.install(RecordingSession::default())).is_none());
        assert_eq!(link.state(), BrokerState::Started);

        let id = block_on(link.publish("sensors/x/1", b"{}", QoS::AtLeastOnce, false));
        assert_eq!(id, Ok(MessageId(1)));

        let session = block_on(link.teardown()).unwrap();
        assert_eq!(session.published.len(), 1);
        assert_eq!(session.published[0].0, "sensors/x/1");
        assert_eq!(session.published[0].2, QoS::AtLeastOnce);
        assert!(!session.published[0].3);
    }

    #[test]
    fn test_publish_after_teardown_fails() {
        let link: BrokerLink<NoopRawMutex, RecordingSession> = BrokerLink::new();
        block_on(link.install(RecordingSession::default()));
        assert!(block_on(link.teardown()).is_some());
        assert_eq!(link.state(), BrokerState::Stopped);
        assert_eq!(
            block_on(link.publish("t", b"{}", QoS::AtLeastOnce, false)),
            Err(PublishError::NotConnected)
        );
    }

    #[test]
    fn test_teardown_cancels_in_flight_publish() {
        let link: BrokerLink<NoopRawMutex, StalledSession> = BrokerLink::new();
        block_on(link.install(StalledSession));

        let (outcome, session) = block_on(join(
            link.publish("t", b"{}", QoS::AtLeastOnce, false),
            link.teardown(),
        ));
        assert_eq!(outcome, Err(PublishError::SessionLost));
        assert!(session.is_some());
        assert_eq!(link.state(), BrokerState::Stopped);
    }

    #[test]
    fn test_reinstall_clears_stale_teardown() {
        let link: BrokerLink<NoopRawMutex, RecordingSession> = BrokerLink::new();
        block_on(link.install(RecordingSession::default()));
        block_on(link.teardown());
        block_on(link.install(RecordingSession::default()));

        assert_eq!(
            block_on(link.publish("t", b"{}", QoS::AtLeastOnce, false)),
            Ok(MessageId(1))
        );
    }
}
