//! DeadLetterReader port - Read-only view of terminally failed events.
//!
//! The relay does not reprocess failed rows. External harvesters (operator
//! tooling, dashboards, alerting) read them through this port.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::outbox::OutboxEvent;

#[async_trait]
pub trait DeadLetterReader: Send + Sync {
    /// Oldest failed rows first.
    async fn list_failed(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError>;

    async fn count_failed(&self) -> Result<u64, DomainError>;
}
