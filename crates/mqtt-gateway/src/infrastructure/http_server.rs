//! HTTP server: REST endpoints, the WebSocket stream, and the dashboard.
//!
//! | Route               | Handler                                         |
//! |---------------------|-------------------------------------------------|
//! | `GET /`             | embedded dashboard page                         |
//! | `GET /api/data`     | last cached broker message                      |
//! | `POST /api/publish` | publish `{topic, message}` to the broker        |
//! | `GET /ws`           | WebSocket stream of every broker message        |
//! | `GET /health`       | liveness plus broker link state                 |
//!
//! # Stream lifecycle
//!
//! Each WebSocket gets a bounded outbound queue registered with the
//! [`ConnectionRegistry`](gateway_core::ConnectionRegistry).  A writer drains
//! that queue onto the socket while a reader drains (and ignores) whatever
//! the client sends.  The stream ends when either side finishes:
//!
//! - the client closes, errors, or goes away (reader ends),
//! - the registry evicts the connection for being too slow, which drops the
//!   queue's sender (writer sends a Close frame and ends), or
//! - a single send takes longer than [`STREAM_SEND_TIMEOUT`], which catches
//!   a client that stopped reading but whose queue has not filled yet.
//!
//! Either way the connection is unregistered before the task returns.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use gateway_core::{Connection, ConnectionId, Frame, Message, PublishError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::application::GatewayFacade;
use crate::domain::{ErrorBody, HealthBody, PublishAck, PublishRequest};

const DASHBOARD_HTML: &str = include_str!("../../assets/dashboard.html");

/// Longest a single frame may take to reach a stream client.
pub const STREAM_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// ── Public API ────────────────────────────────────────────────────────────────

/// Builds the gateway's router with `facade` as shared state.
pub fn router(facade: GatewayFacade) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/data", get(last_message))
        .route("/api/publish", post(publish))
        .route("/ws", get(stream))
        .route("/health", get(health))
        .with_state(facade)
}

/// Serves the router on an already-bound listener until `shutdown` resolves.
///
/// Open WebSocket streams are not waited for; they end with the runtime.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn serve<F>(listener: TcpListener, facade: GatewayFacade, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("HTTP gateway listening on {addr}");

    axum::serve(listener, router(facade))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("HTTP gateway stopped accepting connections");
    Ok(())
}

/// Binds `addr` and serves until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound (port in use, no
/// permission) or the accept loop fails.
pub async fn run_server<F>(addr: SocketAddr, facade: GatewayFacade, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    serve(listener, facade, shutdown).await
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A failed publish, rendered as `{"error": <code>, "detail": <text>}`.
#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct ApiError(#[from] PublishError);

impl ApiError {
    /// HTTP status for the failure.
    ///
    /// An invalid topic is the caller's input error and is rejected before
    /// the broker is involved, so it is a 400 rather than a 500.
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PublishError::InvalidTopic(_) => StatusCode::BAD_REQUEST,
            PublishError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            PublishError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PublishError::Rejected(_) | PublishError::ConnectionLost | PublishError::ShuttingDown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.0.code().to_string(),
            detail: self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        (status, Json(self.body())).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn last_message(State(facade): State<GatewayFacade>) -> Json<Message> {
    Json(Message::clone(&facade.get_last_message()))
}

async fn publish(
    State(facade): State<GatewayFacade>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishAck>, ApiError> {
    let ack = facade.publish(&request.topic, request.message).await?;
    Ok(Json(ack))
}

async fn health(State(facade): State<GatewayFacade>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        broker: facade.link_state(),
    })
}

async fn stream(ws: WebSocketUpgrade, State(facade): State<GatewayFacade>) -> Response {
    ws.on_upgrade(move |socket| run_stream(socket, facade))
}

// ── Per-stream task ───────────────────────────────────────────────────────────

async fn run_stream(socket: WebSocket, facade: GatewayFacade) {
    let (connection, mut frames) = Connection::channel(facade.stream_buffer());
    let id = facade.register_stream(connection);
    info!("stream {id} opened ({} live)", facade.registry().len());

    let (mut sink, mut incoming) = socket.split();

    let writer = forward_frames(id, &mut sink, &mut frames, STREAM_SEND_TIMEOUT);

    let reader = async {
        while let Some(received) = incoming.next().await {
            match received {
                Ok(WsMessage::Close(_)) => {
                    debug!("stream {id}: client sent close frame");
                    break;
                }
                Ok(other) => trace!("stream {id}: ignoring client frame: {other:?}"),
                Err(e) => {
                    debug!("stream {id}: receive error: {e}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    facade.unregister_stream(id);
    info!("stream {id} closed ({} live)", facade.registry().len());
}

/// Why the writer half of a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// The registry dropped the connection.
    Evicted,
    SendFailed,
    /// A send did not complete within the timeout.
    Stalled,
}

/// Drains `frames` onto `sink`, bounding every send by `send_timeout`.
async fn forward_frames<S>(
    id: ConnectionId,
    sink: &mut S,
    frames: &mut mpsc::Receiver<Frame>,
    send_timeout: Duration,
) -> WriterExit
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = frames.recv().await {
        match timeout(send_timeout, sink.send(WsMessage::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("stream {id}: send failed: {e}");
                return WriterExit::SendFailed;
            }
            Err(_) => {
                warn!("stream {id}: client not reading for {send_timeout:?}; closing");
                return WriterExit::Stalled;
            }
        }
    }
    warn!("stream {id}: evicted from broadcast set; closing");
    let _ = timeout(send_timeout, sink.send(WsMessage::Close(None))).await;
    WriterExit::Evicted
}

// ── Tests ─────────────────────────────────────────────────────────────────────
