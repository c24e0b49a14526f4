//! Inbound path: broker message → cache → stream broadcast.
//!
//! # Two execution contexts
//!
//! ```text
//!  broker thread (context 2)                 request loop (context 1)
//!  ─────────────────────────                 ────────────────────────
//!  on_message(topic, bytes)
//!    ├─ decode payload
//!    ├─ SharedState::set
//!    └─ BroadcastQueue::submit ──unbounded──► run_broadcast_dispatcher
//!                                              └─ ConnectionRegistry::broadcast
//! ```
//!
//! The broker thread never calls into the request loop directly.  Its only
//! traffic into the loop is "broadcast this message", sent over an unbounded
//! `mpsc` queue: `send` on an unbounded sender never waits, so a stalled
//! stream client cannot slow the broker receive loop down.

use std::sync::Arc;

use gateway_core::{ConnectionRegistry, Message, SharedState};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Thread-safe hand-off of messages from the broker thread into the loop.
#[derive(Debug, Clone)]
pub struct BroadcastQueue {
    tx: mpsc::UnboundedSender<Arc<Message>>,
}

impl BroadcastQueue {
    /// Creates the queue; the receiver goes to [`run_broadcast_dispatcher`].
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<Message>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues `message` for broadcast.  Never blocks.
    ///
    /// Returns `false` if the dispatcher has stopped.
    pub fn submit(&self, message: Arc<Message>) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Handles every message the broker delivers on the subscribed topic.
pub struct InboundBridge {
    state: Arc<SharedState>,
    queue: BroadcastQueue,
}

impl InboundBridge {
    pub fn new(state: Arc<SharedState>, queue: BroadcastQueue) -> Self {
        Self { state, queue }
    }

    /// Decodes, caches, and schedules a broadcast of one broker message.
    ///
    /// Never fails: non-JSON payloads are cached as text, and a stopped
    /// dispatcher only means nobody is streaming any more.
    pub fn on_message(&self, topic: &str, raw: &[u8]) -> Arc<Message> {
        let cached = self.state.set(Message::from_broker(topic, raw));
        debug!("broker message on {topic}: {}", cached.payload());

        if !self.queue.submit(Arc::clone(&cached)) {
            warn!("broadcast dispatcher stopped; message on {topic} cached only");
        }
        cached
    }
}

/// Drains the hand-off queue on the request loop and fans each message out
/// to the live streams.
///
/// Runs until every [`BroadcastQueue`] clone has been dropped.
pub async fn run_broadcast_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Arc<Message>>,
    registry: Arc<ConnectionRegistry>,
) {
    while let Some(message) = rx.recv().await {
        let report = registry.broadcast(&message);
        debug!(
            "broadcast delivered to {} stream(s), dropped {}",
            report.delivered,
            report.dropped.len()
        );
    }
    info!("broadcast dispatcher stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
