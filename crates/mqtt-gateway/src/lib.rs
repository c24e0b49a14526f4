//! mqtt-gateway library crate.
//!
//! Bridges one MQTT broker to HTTP clients: the latest message on the
//! subscribed topic is cached and pushed to WebSocket streams, and HTTP
//! clients can publish back to the broker.
//!
//! # Architecture
//!
//! ```text
//! MQTT broker
//!     ↕  (rumqttc, mqtt-bridge thread)
//! [mqtt-gateway]
//!   ├── domain/           Config, link state, HTTP JSON bodies
//!   ├── application/      Inbound bridge, broadcast dispatcher, GatewayFacade
//!   └── infrastructure/
//!         ├── broker/      BridgeWorker: MQTT event loop on its own thread
//!         └── http_server/ axum routes + WebSocket streams
//!     ↕  (HTTP / WebSocket, request loop)
//! Browsers and API clients
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `gateway-core`; no MQTT or HTTP
//!   types appear there.
//! - `infrastructure` depends on everything else plus `rumqttc` and `axum`.

/// Domain layer: configuration and wire types (no I/O).
pub mod domain;

/// Application layer: message flow and the facade used by the HTTP layer.
pub mod application;

/// Infrastructure layer: broker thread and HTTP server.
pub mod infrastructure;
