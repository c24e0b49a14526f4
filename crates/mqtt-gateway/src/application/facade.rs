//! The operations the HTTP layer maps its endpoints onto.
//!
//! | Endpoint            | Operation                                     |
//! |---------------------|-----------------------------------------------|
//! | `GET /api/data`     | [`GatewayFacade::get_last_message`]           |
//! | `POST /api/publish` | [`GatewayFacade::publish`]                    |
//! | `GET /ws`           | [`GatewayFacade::register_stream`] / [`GatewayFacade::unregister_stream`] |
//!
//! The facade is cheap to clone (a handful of `Arc`s) and is used as the
//! axum router state.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::{
    validate_publish_topic, Connection, ConnectionId, ConnectionRegistry, Message, MessageBody,
    PublishError, SharedState,
};
use tokio::time::timeout;
use tracing::debug;

use crate::application::ports::BrokerPublisher;
use crate::domain::{GatewayConfig, LinkState, PublishAck};

#[derive(Clone)]
pub struct GatewayFacade {
    state: Arc<SharedState>,
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<dyn BrokerPublisher>,
    publish_timeout: Duration,
    stream_buffer: usize,
}

impl GatewayFacade {
    pub fn new(
        state: Arc<SharedState>,
        registry: Arc<ConnectionRegistry>,
        publisher: Arc<dyn BrokerPublisher>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            state,
            registry,
            publisher,
            publish_timeout: config.publish_timeout,
            stream_buffer: config.stream_buffer,
        }
    }

    /// The most recently received broker message, or the waiting default.
    pub fn get_last_message(&self) -> Arc<Message> {
        self.state.get()
    }

    /// Publishes `body` to `topic` and waits for local send confirmation.
    ///
    /// # Errors
    ///
    /// Any [`PublishError`]; the wait is bounded by the configured publish
    /// timeout and yields [`PublishError::Timeout`] when exceeded.
    pub async fn publish(&self, topic: &str, body: MessageBody) -> Result<PublishAck, PublishError> {
        validate_publish_topic(topic)?;
        let payload = body.into_bytes();
        let size = payload.len();

        let confirmation = self.publisher.submit(topic, payload)?;
        match timeout(self.publish_timeout, confirmation).await {
            Ok(Ok(outcome)) => outcome?,
            // The bridge dropped the confirmation without answering.
            Ok(Err(_)) => return Err(PublishError::ConnectionLost),
            Err(_) => return Err(PublishError::Timeout(self.publish_timeout)),
        }

        debug!("published {size} byte(s) to {topic}");
        Ok(PublishAck::ok(topic))
    }

    /// Adds a stream to the broadcast set.
    pub fn register_stream(&self, connection: Connection) -> ConnectionId {
        self.registry.add(connection)
    }

    /// Removes a stream once its transport has closed.  Idempotent.
    pub fn unregister_stream(&self, id: ConnectionId) -> bool {
        self.registry.remove(id)
    }

    /// Queue depth each new stream should be created with.
    pub fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    pub fn link_state(&self) -> LinkState {
        self.publisher.link_state()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockBrokerPublisher;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn facade_with(publisher: MockBrokerPublisher, publish_timeout: Duration) -> GatewayFacade {
        let config = GatewayConfig {
            publish_timeout,
            ..GatewayConfig::default()
        };
        GatewayFacade::new(
            Arc::new(SharedState::new()),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(publisher),
            &config,
        )
    }

    fn confirmed() -> Result<crate::application::ports::PublishConfirmation, PublishError> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Ok(rx)
    }

    #[tokio::test]
    async fn test_publish_structured_body_sends_json_text() {
        // Arrange
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_submit()
            .withf(|topic, payload| {
                topic.to_string() == "cmd/led" && payload.as_slice() == br#"{"state":"on"}"#
            })
            .times(1)
            .returning(|_, _| confirmed());
        let facade = facade_with(publisher, Duration::from_secs(1));
        let body: MessageBody = serde_json::from_value(json!({"state": "on"})).unwrap();

        // Act
        let ack = facade.publish("cmd/led", body).await.unwrap();

        // Assert
        assert_eq!(ack, PublishAck::ok("cmd/led"));
    }

    #[tokio::test]
    async fn test_publish_text_body_sends_literal_bytes() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_submit()
            .withf(|topic, payload| topic.to_string() == "cmd/led" && payload.as_slice() == b"on")
            .times(1)
            .returning(|_, _| confirmed());
        let facade = facade_with(publisher, Duration::from_secs(1));

        let ack = facade.publish("cmd/led", MessageBody::from("on")).await;

        assert!(ack.is_ok());
    }

    #[tokio::test]
    async fn test_publish_propagates_not_connected() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_submit()
            .returning(|_, _| Err(PublishError::NotConnected));
        let facade = facade_with(publisher, Duration::from_secs(1));

        let result = facade.publish("cmd/led", MessageBody::from("on")).await;

        assert_eq!(result, Err(PublishError::NotConnected));
    }

    #[tokio::test]
    async fn test_publish_times_out_without_confirmation() {
        // Keep the senders alive so the confirmation never resolves.
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_mock = Arc::clone(&held);
        let mut publisher = MockBrokerPublisher::new();
        publisher.expect_submit().returning(move |_, _| {
            let (tx, rx) = oneshot::channel();
            held_in_mock.lock().unwrap().push(tx);
            Ok(rx)
        });
        let facade = facade_with(publisher, Duration::from_millis(50));

        let result = facade.publish("cmd/led", MessageBody::from("on")).await;

        assert_eq!(result, Err(PublishError::Timeout(Duration::from_millis(50))));
        assert_eq!(held.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_reports_connection_lost_when_confirmation_dropped() {
        let mut publisher = MockBrokerPublisher::new();
        publisher.expect_submit().returning(|_, _| {
            let (_tx, rx) = oneshot::channel();
            Ok(rx)
        });
        let facade = facade_with(publisher, Duration::from_secs(1));

        let result = facade.publish("cmd/led", MessageBody::from("on")).await;

        assert_eq!(result, Err(PublishError::ConnectionLost));
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic_before_submitting() {
        let mut publisher = MockBrokerPublisher::new();
        publisher.expect_submit().times(0);
        let facade = facade_with(publisher, Duration::from_secs(1));

        let result = facade.publish("cmd/#", MessageBody::from("on")).await;

        assert!(matches!(result, Err(PublishError::InvalidTopic(_))));
    }

    #[test]
    fn test_get_last_message_defaults_to_waiting() {
        let facade = facade_with(MockBrokerPublisher::new(), Duration::from_secs(1));
        assert_eq!(*facade.get_last_message(), Message::waiting());
    }

    #[test]
    fn test_register_then_unregister_stream() {
        let facade = facade_with(MockBrokerPublisher::new(), Duration::from_secs(1));
        let (conn, mut rx) = Connection::channel(facade.stream_buffer());

        let id = facade.register_stream(conn);
        facade
            .registry()
            .broadcast(&Message::updated("t", json!(1)));
        assert!(rx.try_recv().is_ok());

        assert!(facade.unregister_stream(id));
        assert!(!facade.unregister_stream(id));
        let report = facade.registry().broadcast(&Message::updated("t", json!(2)));
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn test_link_state_comes_from_publisher() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_link_state()
            .return_const(LinkState::Subscribed);
        let facade = facade_with(publisher, Duration::from_secs(1));
        assert_eq!(facade.link_state(), LinkState::Subscribed);
    }
}
