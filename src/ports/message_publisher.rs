//! MessagePublisher port - Interface to the external message broker.
//!
//! This port defines how claimed events reach the broker without the relay
//! knowing about the underlying transport (Redis Streams, in-memory, etc.).

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::outbox::OutboundMessage;

/// Broker acknowledgement for a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Broker-assigned message id (stream entry id, sequence number, ...).
    pub message_id: String,
}

/// Port for publishing outbound messages.
///
/// Implementations must:
/// - Return `Ok` only once the broker durably accepted the message
/// - Enforce in-order delivery among messages sharing `ordering_key`
/// - Never touch outbox rows; the caller finalizes state from the result
///
/// Transient and permanent failures are reported the same way; both consume
/// a retry attempt.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn MessagePublisher) {}
}
