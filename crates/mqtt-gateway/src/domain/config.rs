//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for runtime settings.
//! `main.rs` fills it from CLI arguments and environment variables; tests
//! use [`GatewayConfig::default`] and override single fields.

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

/// Default subscription topic (the DHT11 sensor feed).
pub const DEFAULT_TOPIC: &str = "sensor/dht11/dados";

/// Default broker host used when `MQTT_BROKER_HOST` is not set.
pub const DEFAULT_BROKER_HOST: &str = "test.mosquitto.org";

/// Default MQTT port (plain TCP).
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Everything the broker thread needs to connect and subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker hostname or IP address.  Resolved by the MQTT client on every
    /// (re)connect, so DNS names are fine.
    pub host: String,
    pub port: u16,
    /// MQTT client identifier.  Must be unique per broker; two clients with
    /// the same id kick each other off.
    pub client_id: String,
    /// The one topic subscribed at startup and after every reconnect.
    pub topic: String,
    /// MQTT keep-alive interval sent in CONNECT.
    pub keep_alive: Duration,
}

impl BrokerConfig {
    /// A client id that will not collide with other gateway instances.
    pub fn generated_client_id() -> String {
        format!("mqtt-gateway-{}", Uuid::new_v4().simple())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: Self::generated_client_id(),
            topic: DEFAULT_TOPIC.to_string(),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// All runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP server (REST + WebSocket) binds to.
    pub http_bind_addr: SocketAddr,

    pub broker: BrokerConfig,

    /// Upper bound on waiting for local send confirmation of a publish.
    pub publish_timeout: Duration,

    /// How long startup waits for the first broker connection attempt to
    /// resolve before serving anyway.
    pub connect_timeout: Duration,

    /// First delay before re-polling the broker after a connection error.
    /// Doubles on each consecutive failure up to `max_reconnect_delay`.
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,

    /// Frames queued per stream before the stream is dropped as too slow.
    pub stream_buffer: usize,
}

impl Default for GatewayConfig {
    /// | Field               | Default              |
    /// |---------------------|----------------------|
    /// | http_bind_addr      | `0.0.0.0:8000`       |
    /// | broker              | `test.mosquitto.org:1883`, topic `sensor/dht11/dados` |
    /// | publish_timeout     | 5 seconds            |
    /// | connect_timeout     | 5 seconds            |
    /// | reconnect_delay     | 1 second             |
    /// | max_reconnect_delay | 30 seconds           |
    /// | stream_buffer       | 32 frames            |
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            broker: BrokerConfig::default(),
            publish_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            stream_buffer: 32,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
