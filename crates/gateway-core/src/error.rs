//! Error taxonomy for the gateway core.
//!
//! Only [`PublishError`] ever crosses into the request/response layer.  The
//! other two types describe failures that are contained where they happen:
//!
//! - [`PayloadDecodeError`] is logged and the raw text is cached instead.
//! - [`BroadcastSendError`] removes one stream from the registry and is
//!   otherwise swallowed.

use std::time::Duration;

use thiserror::Error;

/// An outbound publish could not be handed to the broker.
///
/// Surfaced to the caller as a structured failure.  The gateway never
/// retries a publish on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The topic cannot be published to (empty, or contains `+`/`#`).
    #[error("invalid publish topic: {0:?}")]
    InvalidTopic(String),

    /// The broker link is not established (never connected, or dropped).
    #[error("broker is not connected")]
    NotConnected,

    /// The broker client refused the request (e.g. its request queue is full
    /// or its event loop has gone away).
    #[error("broker client rejected the publish: {0}")]
    Rejected(String),

    /// No local send confirmation arrived within the configured bound.
    #[error("no send confirmation within {0:?}")]
    Timeout(Duration),

    /// The link dropped while the publish was waiting to be written.
    #[error("broker connection lost before the message was sent")]
    ConnectionLost,

    /// The gateway is shutting down and the bridge no longer accepts work.
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl PublishError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PublishError::InvalidTopic(_) => "invalid_topic",
            PublishError::NotConnected => "broker_not_connected",
            PublishError::Rejected(_) => "broker_rejected",
            PublishError::Timeout(_) => "publish_timeout",
            PublishError::ConnectionLost => "broker_connection_lost",
            PublishError::ShuttingDown => "gateway_shutting_down",
        }
    }
}

/// Why a single stream could not accept a broadcast.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BroadcastSendError {
    /// The stream's outbound queue is full; the client is not keeping up.
    #[error("stream outbound queue is full")]
    Backpressure,

    /// The stream's writer has gone away (peer disconnected).
    #[error("stream is disconnected")]
    Disconnected,
}

/// Why inbound broker bytes could not be decoded as JSON.
///
/// Never fatal: the caller falls back to caching the payload as text.
#[derive(Debug, Error)]
pub enum PayloadDecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_codes_are_distinct() {
        let all = [
            PublishError::InvalidTopic("a/#".to_string()),
            PublishError::NotConnected,
            PublishError::Rejected("full".to_string()),
            PublishError::Timeout(Duration::from_secs(1)),
            PublishError::ConnectionLost,
            PublishError::ShuttingDown,
        ];
        let mut codes: Vec<&str> = all.iter().map(PublishError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_publish_error_display_includes_detail() {
        let err = PublishError::Rejected("request channel closed".to_string());
        assert!(err.to_string().contains("request channel closed"));
    }

    #[test]
    fn test_timeout_display_mentions_duration() {
        let err = PublishError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
