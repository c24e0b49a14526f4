//! Domain layer for mqtt-gateway.
//!
//! Plain types with no I/O: runtime configuration, the broker link state,
//! and the JSON bodies of the HTTP endpoints.  The message model itself lives
//! in `gateway-core` because the broker thread and the request loop share it.

pub mod api;
pub mod config;
pub mod link;

pub use api::{ErrorBody, HealthBody, PublishAck, PublishRequest};
pub use config::{BrokerConfig, GatewayConfig};
pub use link::LinkState;
