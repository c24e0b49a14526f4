//! Registry of live stream connections and the broadcast fan-out.
//!
//! # How a stream is represented
//!
//! The registry never touches sockets.  Each live stream is represented by
//! the sending half of a bounded `tokio::sync::mpsc` queue; a per-stream
//! writer task (owned by the transport) drains the receiving half onto the
//! socket.  That keeps [`ConnectionRegistry::broadcast`] synchronous and
//! non-blocking: it only ever calls `try_send`.
//!
//! ```text
//! broadcast(msg) ──try_send──► [queue A] ──► writer A ──► socket A
//!                ──try_send──► [queue B] ──► writer B ──► socket B
//!                ──try_send──► [queue C]  (full: C is removed)
//! ```
//!
//! # Failure isolation
//!
//! A stream whose queue is full (slow client) or closed (writer gone) is
//! removed from the registry during the same broadcast.  Delivery to the
//! other streams continues and `broadcast` itself never fails.
//!
//! # Locking
//!
//! Membership lives in one `Mutex<HashMap>`.  `add`, `remove`, and the whole
//! of `broadcast` (deliver + evict) are each a single critical section, so a
//! broadcast never observes a stream half-removed.  No `.await` happens while
//! the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BroadcastSendError;
use crate::message::Message;

/// One serialised message frame, shared by every stream it is sent to.
pub type Frame = Arc<str>;

/// Identifies one registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one live stream: an id plus the sending half of its queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
}

impl Connection {
    /// Wraps an existing queue sender.
    pub fn new(sender: mpsc::Sender<Frame>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// Creates a connection together with the receiver its writer drains.
    ///
    /// `capacity` is how many frames may be queued before the stream is
    /// considered too slow and dropped.  Must be at least 1.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn try_deliver(&self, frame: &Frame) -> Result<(), BroadcastSendError> {
        self.sender
            .try_send(Arc::clone(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => BroadcastSendError::Backpressure,
                TrySendError::Closed(_) => BroadcastSendError::Disconnected,
            })
    }
}

/// Outcome of one [`ConnectionRegistry::broadcast`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Streams that accepted the frame.
    pub delivered: usize,
    /// Streams that failed and were removed, with the reason.
    pub dropped: Vec<(ConnectionId, BroadcastSendError)>,
}

/// The set of live streams.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream; it receives every broadcast from now on.
    pub fn add(&self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        let total = {
            let mut members = self.lock();
            members.insert(id, connection);
            members.len()
        };
        debug!("stream {id} registered ({total} live)");
        id
    }

    /// Deregisters a stream.  Removing an absent stream is a no-op.
    ///
    /// Returns `true` if the stream was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut members = self.lock();
            let removed = members.remove(&id).is_some();
            (removed, members.len())
        };
        if removed {
            debug!("stream {id} removed ({total} live)");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delivers `message` to every registered stream.
    ///
    /// Streams that cannot accept the frame are removed.  Always succeeds as
    /// a whole; see [`BroadcastReport`] for what happened per stream.
    pub fn broadcast(&self, message: &Message) -> BroadcastReport {
        let frame: Frame = Arc::from(message.to_json_text());
        self.broadcast_frame(&frame)
    }

    /// Same as [`broadcast`](Self::broadcast) for an already serialised frame.
    pub fn broadcast_frame(&self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        {
            let mut members = self.lock();
            for (id, connection) in members.iter() {
                match connection.try_deliver(frame) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => report.dropped.push((*id, e)),
                }
            }
            for (id, _) in &report.dropped {
                members.remove(id);
            }
        }

        for (id, reason) in &report.dropped {
            warn!("stream {id} dropped during broadcast: {reason}");
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
