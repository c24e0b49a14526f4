//! Shared fixtures for mqtt-gateway integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use gateway_core::{ConnectionRegistry, PublishError, SharedState};
use mqtt_gateway::application::{BrokerPublisher, GatewayFacade, PublishConfirmation};
use mqtt_gateway::domain::{GatewayConfig, LinkState};
use tokio::sync::oneshot;

/// In-memory broker publisher: records every submit and answers at once.
pub struct FakePublisher {
    pub link: LinkState,
    pub outcome: Result<(), PublishError>,
    pub submitted: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakePublisher {
    pub fn subscribed() -> Self {
        Self {
            link: LinkState::Subscribed,
            outcome: Ok(()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_link(link: LinkState) -> Self {
        Self {
            link,
            ..Self::subscribed()
        }
    }
}

impl BrokerPublisher for FakePublisher {
    fn submit(&self, topic: &str, payload: Vec<u8>) -> Result<PublishConfirmation, PublishError> {
        if !self.link.can_publish() {
            return Err(PublishError::NotConnected);
        }
        self.submitted
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.outcome.clone());
        Ok(rx)
    }

    fn link_state(&self) -> LinkState {
        self.link
    }
}

pub struct Gateway {
    pub facade: GatewayFacade,
    pub state: Arc<SharedState>,
    pub registry: Arc<ConnectionRegistry>,
    pub publisher: Arc<FakePublisher>,
}

pub fn gateway_with(publisher: FakePublisher) -> Gateway {
    let state = Arc::new(SharedState::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let publisher = Arc::new(publisher);
    let facade = GatewayFacade::new(
        Arc::clone(&state),
        Arc::clone(&registry),
        Arc::clone(&publisher) as Arc<dyn BrokerPublisher>,
        &GatewayConfig::default(),
    );
    Gateway {
        facade,
        state,
        registry,
        publisher,
    }
}
