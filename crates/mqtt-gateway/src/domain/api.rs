//! JSON bodies of the HTTP endpoints.
//!
//! ```json
//! POST /api/publish   {"topic":"cmd/led","message":{"state":"on"}}
//!   200               {"status":"ok","topic":"cmd/led"}
//!   503               {"error":"broker_not_connected","detail":"publish failed: broker is not connected"}
//! GET  /health        {"status":"ok","broker":"subscribed"}
//! ```
//!
//! `GET /api/data` returns a [`gateway_core::Message`] directly.

use gateway_core::MessageBody;
use serde::{Deserialize, Serialize};

use super::link::LinkState;

/// Body of `POST /api/publish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    /// Plain text is published verbatim; a JSON object is published as its
    /// JSON text.
    pub message: MessageBody,
}

/// Success body of `POST /api/publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub status: String,
    pub topic: String,
}

impl PublishAck {
    pub fn ok(topic: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            topic: topic.into(),
        }
    }
}

/// Failure body for any endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub error: String,
    /// Human-readable explanation.
    pub detail: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub broker: LinkState,
}
