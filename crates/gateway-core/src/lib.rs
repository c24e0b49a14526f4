//! # gateway-core
//!
//! The bridging core of the MQTT gateway: the pieces whose correctness does
//! not depend on any socket, broker, or HTTP framework.
//!
//! - **`message`** – The cached [`Message`] record, inbound payload decoding
//!   (JSON with a plain-text fallback), and outbound [`MessageBody`] encoding.
//! - **`shared_state`** – [`SharedState`], the single "last received message"
//!   cache shared by the broker thread and the request loop.
//! - **`registry`** – [`ConnectionRegistry`], the set of live stream
//!   connections and its failure-isolated broadcast.
//! - **`error`** – The error taxonomy shared by both gateway contexts.
//!
//! Everything here is synchronous and safe to call from any thread.  The only
//! async-runtime type used is `tokio::sync::mpsc`, whose sending half works
//! outside a runtime.

pub mod error;
pub mod message;
pub mod registry;
pub mod shared_state;

pub use error::{BroadcastSendError, PayloadDecodeError, PublishError};
pub use message::{
    decode_payload, validate_publish_topic, Message, MessageBody, MessageStatus,
};
pub use registry::{BroadcastReport, Connection, ConnectionId, ConnectionRegistry, Frame};
pub use shared_state::SharedState;
