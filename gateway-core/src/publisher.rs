//! Last pipeline stage: validated messages out to the broker.

use crate::broker::{BrokerLink, BrokerSession, MessageId, PublishError};
use crate::config::{DEFAULT_QOS, RETAIN};
use crate::queue::MessageQueue;
use crate::record::ValidatedMessage;
use crate::stats::{GatewayStats, StatEvent};
use crate::topic::TopicRouter;
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Drains the message queue into the live broker session.
///
/// Each message gets exactly one publish attempt. Without a session the
/// message is dropped; nothing is buffered for a later reconnect.
pub struct Publisher<'a, M: RawMutex, S> {
    queue: &'a MessageQueue<M>,
    link: &'a BrokerLink<M, S>,
    router: TopicRouter,
    stats: &'a GatewayStats,
}

impl<'a, M: RawMutex, S: BrokerSession> Publisher<'a, M, S> {
    /// Create a publisher using the default topic scheme.
    pub fn new(
        queue: &'a MessageQueue<M>,
        link: &'a BrokerLink<M, S>,
        stats: &'a GatewayStats,
    ) -> Self {
        Self::with_router(queue, link, TopicRouter::default(), stats)
    }

    pub fn with_router(
        queue: &'a MessageQueue<M>,
        link: &'a BrokerLink<M, S>,
        router: TopicRouter,
        stats: &'a GatewayStats,
    ) -> Self {
        Self {
            queue,
            link,
            router,
            stats,
        }
    }

    /// Publish forever.
    pub async fn run(&mut self) -> ! {
        loop {
            let _ = self.process_one().await;
        }
    }

    /// Wait for one message and publish it.
    ///
    /// Returns the result of the operation for testing purposes.
    pub async fn process_one(&mut self) -> Result<MessageId, PublishError> {
        let message = self.queue.dequeue().await;
        self.publish(message).await
    }

    /// Publish `message` once, then release it.
    pub async fn publish(&self, message: ValidatedMessage) -> Result<MessageId, PublishError> {
        let topic = self.router.topic_for(message.as_str());

        match self
            .link
            .publish(&topic, message.as_bytes(), DEFAULT_QOS, RETAIN)
            .await
        {
            Ok(id) => {
                self.stats.count(StatEvent::Published);
                info!(
                    "MQTT publish id={} topic={} payload={}",
                    id.0,
                    topic.as_str(),
                    message.as_str()
                );
                Ok(id)
            }
            Err(e) => {
                self.stats.count(StatEvent::PublishFailed);
                warn!("MQTT publish to {} failed: {}", topic.as_str(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::broker::QoS;
    use crate::config::TopicScheme;
    use crate::validator::canonicalize;
    use core::future::Future;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockSession {
        published: Vec<(String, String, QoS, bool)>,
        reject: bool,
    }

    impl BrokerSession for MockSession {
        fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: QoS,
            retain: bool,
        ) -> impl Future<Output = Result<MessageId, PublishError>> {
            let outcome = if self.reject {
                Err(PublishError::Rejected)
            } else {
                self.published.push((
                    topic.into(),
                    String::from_utf8(payload.to_vec()).unwrap(),
                    qos,
                    retain,
                ));
                Ok(MessageId(self.published.len() as u16))
            };
            core::future::ready(outcome)
        }
    }

    fn message(text: &str) -> ValidatedMessage {
        canonicalize(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_publishes_with_derived_topic() {
        let queue = MessageQueue::<NoopRawMutex>::new();
        let link = BrokerLink::<NoopRawMutex, MockSession>::new();
        let stats = GatewayStats::new();
        block_on(link.install(MockSession::default()));
        let mut publisher = Publisher::new(&queue, &link, &stats);

        queue.try_enqueue(message(r#"{"id":7,"t":21.5}"#)).unwrap();
        assert_eq!(block_on(publisher.process_one()), Ok(MessageId(1)));

        let session = block_on(link.teardown()).unwrap();
        assert_eq!(
            session.published,
            [(
                String::from("sensors/bluepill/7"),
                String::from(r#"{"id":7,"t":21.5}"#),
                QoS::AtLeastOnce,
                false
            )]
        );
        assert_eq!(stats.snapshot().published, 1);
    }

    #[test]
    fn test_drops_message_without_session() {
        let queue = MessageQueue::<NoopRawMutex>::new();
        let link = BrokerLink::<NoopRawMutex, MockSession>::new();
        let stats = GatewayStats::new();
        let mut publisher = Publisher::new(&queue, &link, &stats);

        queue.try_enqueue(message("{}")).unwrap();
        assert_eq!(
            block_on(publisher.process_one()),
            Err(PublishError::NotConnected)
        );
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().publish_failed, 1);
    }

    #[test]
    fn test_rejected_publish_is_not_retried() {
        let queue = MessageQueue::<NoopRawMutex>::new();
        let link = BrokerLink::<NoopRawMutex, MockSession>::new();
        let stats = GatewayStats::new();
        block_on(link.install(MockSession {
            reject: true,
            ..MockSession::default()
        }));
        let mut publisher = Publisher::new(&queue, &link, &stats);

        queue.try_enqueue(message(r#"{"id":1}"#)).unwrap();
        assert_eq!(
            block_on(publisher.process_one()),
            Err(PublishError::Rejected)
        );
        assert!(queue.is_empty());
        assert!(block_on(link.teardown()).unwrap().published.is_empty());
    }

    #[test]
    fn test_custom_router() {
        let queue = MessageQueue::<NoopRawMutex>::new();
        let link = BrokerLink::<NoopRawMutex, MockSession>::new();
        let stats = GatewayStats::new();
        block_on(link.install(MockSession::default()));
        let router = TopicRouter::new(TopicScheme::new("lab", "thermo"));
        let publisher = Publisher::with_router(&queue, &link, router, &stats);

        block_on(publisher.publish(message(r#"{"t":1}"#))).unwrap();
        let session = block_on(link.teardown()).unwrap();
        assert_eq!(session.published[0].0, "lab/thermo/unknown");
    }
}
