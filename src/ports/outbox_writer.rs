//! OutboxWriter port - The producer contract.
//!
//! This port implements the write half of the Transactional Outbox Pattern:
//! a producer inserts exactly one event row per business fact, in the same
//! database transaction as the business change it describes.
//!
//! ## Pattern Overview
//!
//! 1. Producer saves its aggregate AND one outbox row in the same transaction
//! 2. The row becomes visible on commit; an insert trigger notifies the relay
//! 3. The relay leases the row, publishes it, and finalizes its status
//!
//! The relay's only promise to producers: once the row is committed it will
//! reach the broker at least once, or surface as `failed` for operators.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::outbox::{NewOutboxEvent, OutboxEvent};

/// Port for staging events in the outbox.
///
/// Implementations must:
/// - Reject a second row with an already used `event_id` (`DuplicateEvent`)
/// - Never publish anything themselves
///
/// Transaction-scoped variants live on the concrete adapter (for Postgres,
/// `PostgresOutboxStore::write_in_txn`) because the transaction type is
/// storage specific.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    /// Stage a single event.
    async fn write(&self, event: &NewOutboxEvent) -> Result<OutboxEvent, DomainError>;

    /// Stage several events atomically.
    async fn write_batch(
        &self,
        events: &[NewOutboxEvent],
    ) -> Result<Vec<OutboxEvent>, DomainError>;
}
