//! The cached message record and the payload codecs around it.
//!
//! # Inbound: broker bytes → [`Message`]
//!
//! Broker payloads are opaque bytes.  The gateway tries to interpret them as
//! JSON so HTTP and stream clients receive structured data, but a sensor that
//! publishes `temp=22` must still show up, so anything that is not JSON is
//! kept verbatim as a JSON string:
//!
//! ```text
//! b"{\"temp\":22}"  →  {"temp": 22}
//! b"temp=22"        →  "temp=22"
//! ```
//!
//! # Outbound: [`MessageBody`] → broker bytes
//!
//! Clients publish either plain text (sent as-is) or a JSON object (sent as
//! its JSON text).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PayloadDecodeError, PublishError};

/// Whether the cache has seen a broker message yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Nothing received since startup.
    Waiting,
    /// Holds the most recent broker message.
    Updated,
}

/// One broker message as seen by HTTP and stream clients.
///
/// Immutable once built: the cache swaps whole `Message` values and never
/// edits one in place, so a reader can never see a topic from one message
/// paired with the payload of another.
///
/// Serialises as `{"topic": ..., "payload": ..., "status": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    topic: Option<String>,
    payload: Value,
    status: MessageStatus,
}

impl Message {
    /// The startup value: no topic, null payload, [`MessageStatus::Waiting`].
    pub fn waiting() -> Self {
        Self {
            topic: None,
            payload: Value::Null,
            status: MessageStatus::Waiting,
        }
    }

    /// A freshly received message.
    pub fn updated(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            payload,
            status: MessageStatus::Updated,
        }
    }

    /// Builds an updated message straight from broker bytes, falling back to
    /// text when the bytes are not JSON (see [`decode_payload`]).
    pub fn from_broker(topic: impl Into<String>, raw: &[u8]) -> Self {
        Self::updated(topic, decode_payload(raw))
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// JSON text of this message, as pushed to stream clients.
    pub fn to_json_text(&self) -> String {
        // A struct of strings and `serde_json::Value` has no map keys that
        // could fail to serialise.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::waiting()
    }
}

/// Interprets broker bytes as JSON, keeping the text when that fails.
///
/// Never fails and never drops data.  Bytes that are not even valid UTF-8 are
/// decoded lossily (invalid sequences become U+FFFD).
pub fn decode_payload(raw: &[u8]) -> Value {
    match try_decode_json(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("payload kept as text: {e}");
            Value::String(String::from_utf8_lossy(raw).into_owned())
        }
    }
}

fn try_decode_json(raw: &[u8]) -> Result<Value, PayloadDecodeError> {
    let text = std::str::from_utf8(raw)?;
    Ok(serde_json::from_str(text)?)
}

/// Checks that `topic` is a concrete MQTT topic name.
///
/// Subscriptions may use the `+` and `#` wildcards; publishes may not, and
/// the empty topic is invalid for both.
pub fn validate_publish_topic(topic: &str) -> Result<(), PublishError> {
    if topic.is_empty() || topic.contains(&['+', '#', '\0'][..]) {
        return Err(PublishError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// What a client asks the gateway to publish.
///
/// Accepts either a JSON string or a JSON object; anything else is rejected
/// at deserialisation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Structured(Map<String, Value>),
}

impl MessageBody {
    /// The exact bytes handed to the broker.
    ///
    /// `Text("on")` becomes `b"on"`; `Structured({"state":"on"})` becomes
    /// `br#"{"state":"on"}"#`.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            MessageBody::Text(text) => text.into_bytes(),
            MessageBody::Structured(map) => Value::Object(map).to_string().into_bytes(),
        }
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        MessageBody::Text(text.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
