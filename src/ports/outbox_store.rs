//! OutboxStore port - Leasing and finalizing outbox rows.
//!
//! The claim is the single synchronization primitive of the relay. It must be
//! one indivisible storage operation: two instances racing for the same
//! eligible row produce exactly one winner, and the loser sees the next
//! eligible row or no work at all. Locked rows are skipped, never waited on.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, OutboxId, Timestamp};
use crate::domain::outbox::{FailureOutcome, OutboxEvent, RetryPolicy};

/// Port for the relay side of the outbox table.
///
/// Eligibility for [`claim_next`](OutboxStore::claim_next):
/// - `status = pending` and `next_attempt_at <= now`
/// - for rows with a shard key: no row with the same key is `publishing`,
///   and no older row with the same key is still `pending`
///
/// Among eligible rows the oldest by `created_at` wins.
///
/// Every finalize method only applies to rows currently in `publishing` and
/// returns `InvalidStateTransition` otherwise (for example when the lease was
/// already reclaimed by the sweeper).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically lease the oldest eligible row, flipping it to `publishing`.
    ///
    /// Returns `None` when no row is eligible.
    async fn claim_next(&self, now: Timestamp) -> Result<Option<OutboxEvent>, DomainError>;

    /// `publishing → published`.
    async fn mark_published(&self, id: OutboxId, now: Timestamp) -> Result<(), DomainError>;

    /// `publishing → pending` or `publishing → failed`, as decided by the
    /// retry policy.
    async fn record_failure(
        &self,
        id: OutboxId,
        outcome: &FailureOutcome,
        error: &str,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Treat every lease taken before `leased_before` as a failed attempt.
    ///
    /// Returns the number of rows moved out of `publishing`.
    async fn requeue_expired_leases(
        &self,
        leased_before: Timestamp,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Result<u64, DomainError>;

    /// Look up a single row.
    async fn find_by_id(&self, id: OutboxId) -> Result<Option<OutboxEvent>, DomainError>;
}
