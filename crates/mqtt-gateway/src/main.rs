//! MQTT gateway: entry point.
//!
//! Subscribes to one MQTT topic, caches the latest message, pushes every new
//! message to WebSocket clients, and lets HTTP clients publish to the broker.
//!
//! # Usage
//!
//! ```text
//! mqtt-gateway [OPTIONS]
//!
//! Options:
//!   --http-bind <IP>               HTTP bind address [default: 0.0.0.0]
//!   --http-port <PORT>             HTTP port [default: 8000]
//!   --broker-host <HOST>           MQTT broker host [default: test.mosquitto.org]
//!   --broker-port <PORT>           MQTT broker port [default: 1883]
//!   --topic <TOPIC>                Topic to subscribe to [default: sensor/dht11/dados]
//!   --client-id <ID>               MQTT client id [default: mqtt-gateway-<uuid>]
//!   --keep-alive <SECS>            MQTT keep-alive [default: 60]
//!   --publish-timeout-ms <MS>      Publish confirmation timeout [default: 5000]
//!   --connect-timeout-ms <MS>      Startup wait for the broker [default: 5000]
//!   --reconnect-delay-ms <MS>      First reconnect delay [default: 1000]
//!   --max-reconnect-delay-ms <MS>  Reconnect delay cap [default: 30000]
//!   --stream-buffer <N>            Frames queued per stream [default: 32]
//! ```
//!
//! Every option can also be set through the environment variable named in
//! `--help` (for example `MQTT_BROKER_HOST`).  CLI args take precedence.
//! Log verbosity follows `RUST_LOG` (default `info`).
//!
//! # Execution contexts
//!
//! HTTP requests and WebSocket streams are served on a single-threaded
//! runtime.  The broker client runs on its own `mqtt-bridge` thread and hands
//! inbound messages to the request loop through a queue.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gateway_core::{ConnectionRegistry, SharedState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mqtt_gateway::application::{run_broadcast_dispatcher, BroadcastQueue, GatewayFacade, InboundBridge};
use mqtt_gateway::domain::config::{DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_TOPIC};
use mqtt_gateway::domain::{BrokerConfig, GatewayConfig};
use mqtt_gateway::infrastructure::{run_server, BridgeWorker};

/// How long shutdown waits for the broker thread at each stage.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// MQTT to HTTP/WebSocket gateway.
#[derive(Debug, Parser)]
#[command(
    name = "mqtt-gateway",
    about = "Cache, stream, and publish MQTT messages over HTTP and WebSocket",
    version
)]
struct Cli {
    /// IP address the HTTP server binds to.
    #[arg(long, default_value = "0.0.0.0", env = "GATEWAY_HTTP_BIND")]
    http_bind: String,

    /// TCP port for the HTTP server (REST, WebSocket, dashboard).
    #[arg(long, default_value_t = 8000, env = "GATEWAY_HTTP_PORT")]
    http_port: u16,

    /// Hostname or IP address of the MQTT broker.
    #[arg(long, default_value = DEFAULT_BROKER_HOST, env = "MQTT_BROKER_HOST")]
    broker_host: String,

    #[arg(long, default_value_t = DEFAULT_BROKER_PORT, env = "MQTT_BROKER_PORT")]
    broker_port: u16,

    /// Topic subscribed at startup and after every reconnect.
    #[arg(long, default_value = DEFAULT_TOPIC, env = "MQTT_TOPIC_SUB")]
    topic: String,

    /// MQTT client id.  A unique one is generated when omitted.
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// MQTT keep-alive interval in seconds.
    #[arg(long, default_value_t = 60, env = "MQTT_KEEP_ALIVE")]
    keep_alive: u64,

    /// How long a publish waits for the broker client to send it.
    #[arg(long, default_value_t = 5000, env = "GATEWAY_PUBLISH_TIMEOUT_MS")]
    publish_timeout_ms: u64,

    /// How long startup waits for the first broker connection.
    #[arg(long, default_value_t = 5000, env = "GATEWAY_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: u64,

    /// First delay before reconnecting after a broker error.
    #[arg(long, default_value_t = 1000, env = "MQTT_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: u64,

    /// Upper bound for the doubling reconnect delay.
    #[arg(long, default_value_t = 30000, env = "MQTT_MAX_RECONNECT_DELAY_MS")]
    max_reconnect_delay_ms: u64,

    /// Messages queued per WebSocket stream before it is dropped as too slow.
    #[arg(long, default_value_t = 32, env = "GATEWAY_STREAM_BUFFER")]
    stream_buffer: usize,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--http-bind` is not an IP address, the client id
    /// is blank, the stream buffer is zero, or the reconnect delay exceeds
    /// its maximum.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let bind_ip: IpAddr = self
            .http_bind
            .parse()
            .with_context(|| format!("invalid HTTP bind address: '{}'", self.http_bind))?;

        anyhow::ensure!(self.stream_buffer > 0, "--stream-buffer must be at least 1");
        if let Some(id) = &self.client_id {
            anyhow::ensure!(
                !id.is_empty() && !id.starts_with(' '),
                "invalid MQTT client id: '{id}'"
            );
        }
        anyhow::ensure!(
            self.reconnect_delay_ms <= self.max_reconnect_delay_ms,
            "--reconnect-delay-ms ({}) exceeds --max-reconnect-delay-ms ({})",
            self.reconnect_delay_ms,
            self.max_reconnect_delay_ms
        );

        Ok(GatewayConfig {
            http_bind_addr: SocketAddr::new(bind_ip, self.http_port),
            broker: BrokerConfig {
                host: self.broker_host,
                port: self.broker_port,
                client_id: self.client_id.unwrap_or_else(BrokerConfig::generated_client_id),
                topic: self.topic,
                keep_alive: Duration::from_secs(self.keep_alive),
            },
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            stream_buffer: self.stream_buffer,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// # What happens at startup
///
/// 1. Logging is initialised from `RUST_LOG`.
/// 2. CLI arguments become a [`GatewayConfig`].
/// 3. The cache, the stream registry, and the broadcast dispatcher are set up.
/// 4. The broker thread starts; startup waits up to `connect_timeout` for
///    the subscription but serves either way.
/// 5. The HTTP server runs until Ctrl+C / SIGTERM, then the broker thread is
///    disconnected and joined.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_gateway_config()?;

    info!(
        "MQTT gateway starting: http={}, broker={}:{}, topic={}",
        config.http_bind_addr, config.broker.host, config.broker.port, config.broker.topic
    );

    let state = Arc::new(SharedState::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let (queue, queue_rx) = BroadcastQueue::new();
    let dispatcher = tokio::spawn(run_broadcast_dispatcher(queue_rx, Arc::clone(&registry)));

    let worker = BridgeWorker::start(&config, InboundBridge::new(Arc::clone(&state), queue))
        .context("failed to start the broker thread")?;

    match worker.wait_until_ready(config.connect_timeout).await {
        Ok(link) => info!("broker link is {link}"),
        Err(e) => error!("{e}; serving cached data while the bridge keeps retrying"),
    }

    let facade = GatewayFacade::new(state, registry, Arc::new(worker.publisher()), &config);
    let served = run_server(config.http_bind_addr, facade, shutdown_signal()).await;

    // Runs whether the server stopped cleanly or never started.
    worker.shutdown(SHUTDOWN_GRACE).await;
    dispatcher.abort();

    served?;
    info!("MQTT gateway stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C; shutting down"),
        _ = terminate => info!("received SIGTERM; shutting down"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
