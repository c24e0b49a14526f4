//! Port to the broker client's publish side.
//!
//! The facade only needs "hand these bytes to the broker and tell me when
//! they have left the client".  Hiding that behind a trait lets the facade be
//! tested without a broker, and keeps `rumqttc` types out of the application
//! layer.

use gateway_core::PublishError;
use tokio::sync::oneshot;

use crate::domain::LinkState;

/// Resolves once the broker client has written the publish to its socket
/// (local send confirmation, not a broker-side acknowledgement).
///
/// A dropped sender means the bridge stopped before confirming.
pub type PublishConfirmation = oneshot::Receiver<Result<(), PublishError>>;

#[cfg_attr(test, mockall::automock)]
pub trait BrokerPublisher: Send + Sync {
    /// Queues `payload` for `topic` without blocking.
    ///
    /// # Errors
    ///
    /// [`PublishError::NotConnected`] when the link is down, or
    /// [`PublishError::Rejected`] when the client will not take the request.
    fn submit(&self, topic: &str, payload: Vec<u8>) -> Result<PublishConfirmation, PublishError>;

    /// Current state of the broker link.
    fn link_state(&self) -> LinkState;
}
