//! Application layer for mqtt-gateway.
//!
//! Knows *what* happens to a message but not *how* bytes move:
//!
//! - `bridge_service` – inbound broker messages → cache → broadcast hand-off
//! - `facade` – the three operations exposed to the HTTP layer
//! - `ports` – the trait the broker infrastructure implements for publishing
//!
//! No sockets are opened here and no MQTT types appear here.

pub mod bridge_service;
pub mod facade;
pub mod ports;

pub use bridge_service::{run_broadcast_dispatcher, BroadcastQueue, InboundBridge};
pub use facade::GatewayFacade;
pub use ports::{BrokerPublisher, PublishConfirmation};
