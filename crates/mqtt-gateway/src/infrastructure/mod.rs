//! Infrastructure layer for mqtt-gateway.
//!
//! Everything that touches a socket lives here:
//!
//! - `broker` – the MQTT client on its dedicated `mqtt-bridge` thread
//!   ([`BridgeWorker`]) and the publish handle it hands to the facade
//! - `http_server` – the axum router, the WebSocket stream task, and the
//!   accept loop
//!
//! Configuration parsing is done in `main.rs`, not here.

pub mod broker;
pub mod http_server;

pub use broker::{BridgeWorker, BrokerConnectError, MqttPublisher};
pub use http_server::{router, run_server, serve, ApiError};
