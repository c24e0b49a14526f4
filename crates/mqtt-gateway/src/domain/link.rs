//! Broker link state machine.
//!
//! ```text
//! Disconnected ──start──► Connecting ──ConnAck──► Connected ──SubAck──► Subscribed
//!      ▲                      │                       │                     │
//!      └──────── error ───────┴───────────────────────┴─────────────────────┘
//! ```
//!
//! The broker thread is the only writer; everyone else observes it through a
//! `tokio::sync::watch` receiver.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl LinkState {
    /// Whether an outbound publish can be handed to the broker client.
    pub fn can_publish(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Subscribed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_states_can_publish() {
        assert!(!LinkState::Disconnected.can_publish());
        assert!(!LinkState::Connecting.can_publish());
        assert!(LinkState::Connected.can_publish());
        assert!(LinkState::Subscribed.can_publish());
    }

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&LinkState::Subscribed).unwrap();
        assert_eq!(json, format!("\"{}\"", LinkState::Subscribed));
    }
}
