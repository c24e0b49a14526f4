//! The "last received message" cache.
//!
//! # Thread safety
//!
//! Two execution contexts touch this cache: the broker thread writes it on
//! every inbound message, and the HTTP request loop reads it.  The value is
//! stored as an `Arc<Message>` behind an `RwLock`, so:
//!
//! - `set` builds the new `Message` *outside* the lock and only swaps a
//!   pointer while holding it.
//! - `get` clones the `Arc` (a reference-count bump) and releases the lock
//!   immediately; the caller then reads a message nobody else can change.
//!
//! Neither side ever holds the lock across an `.await` or any I/O.

use std::sync::{Arc, PoisonError, RwLock};

use crate::message::Message;

/// Process-wide cache of the most recent broker message.
#[derive(Debug)]
pub struct SharedState {
    last: RwLock<Arc<Message>>,
}

impl SharedState {
    /// Creates a cache holding [`Message::waiting`].
    pub fn new() -> Self {
        Self {
            last: RwLock::new(Arc::new(Message::waiting())),
        }
    }

    /// Returns the current message.
    pub fn get(&self) -> Arc<Message> {
        // A poisoned lock still holds a complete `Arc`; the swap in `set`
        // cannot panic half-way.
        let guard = self.last.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replaces the current message and returns the shared handle to it.
    pub fn set(&self, message: Message) -> Arc<Message> {
        let next = Arc::new(message);
        let mut guard = self.last.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&next);
        next
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageStatus;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_get_before_any_set_returns_waiting() {
        let state = SharedState::new();
        assert_eq!(*state.get(), Message::waiting());
    }

    #[test]
    fn test_get_returns_most_recent_set() {
        // Arrange
        let state = SharedState::new();

        // Act
        for i in 0..5 {
            state.set(Message::updated("sensor", json!({ "seq": i })));
        }

        // Assert
        let last = state.get();
        assert_eq!(last.payload(), &json!({ "seq": 4 }));
        assert_eq!(last.status(), MessageStatus::Updated);
    }

    #[test]
    fn test_earlier_snapshot_is_unchanged_by_later_set() {
        let state = SharedState::new();
        state.set(Message::updated("a", json!(1)));
        let snapshot = state.get();

        state.set(Message::updated("b", json!(2)));

        assert_eq!(snapshot.topic(), Some("a"));
        assert_eq!(state.get().topic(), Some("b"));
    }

    #[test]
    fn test_concurrent_set_and_get_never_tear() {
        // Each writer stores the topic inside the payload too, so a reader can
        // detect a topic/payload pair that came from two different messages.
        let state = Arc::new(SharedState::new());
        let mut handles = Vec::new();

        for writer in 0..4 {
            let state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                for i in 0..2_000 {
                    let topic = format!("w{writer}/{i}");
                    state.set(Message::updated(topic.clone(), json!({ "topic": topic })));
                }
            }));
        }

        for _ in 0..4 {
            let state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                for _ in 0..2_000 {
                    let msg = state.get();
                    match msg.status() {
                        MessageStatus::Waiting => assert_eq!(msg.topic(), None),
                        MessageStatus::Updated => {
                            assert_eq!(msg.payload()["topic"], json!(msg.topic().unwrap()));
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().expect("no thread may panic");
        }
        assert_eq!(state.get().status(), MessageStatus::Updated);
    }
}
