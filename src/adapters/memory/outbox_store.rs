//! In-memory outbox store for tests and local runs.
//!
//! Every operation runs under one mutex, which gives each call the same
//! all-or-nothing behavior as the single-statement SQL in the Postgres
//! adapter. Insertion order is the FIFO order.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in production.
//! It uses `.expect()` on lock operations which will panic if locks are poisoned.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::domain::foundation::{DomainError, ErrorCode, OutboxId, StateMachine, Timestamp};
use crate::domain::outbox::{
    FailureOutcome, NewOutboxEvent, OutboxEvent, OutboxStatus, RetryPolicy,
};
use crate::ports::{ChangeNotification, DeadLetterReader, OutboxStore, OutboxWriter};

use super::InMemoryChangeNotifier;

const NOTIFICATION_BUFFER: usize = 1024;

/// In-memory outbox table.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryOutboxStore::new());
/// store.write(&NewOutboxEvent::new("documents", EventId::new(), payload)?).await?;
///
/// let claimed = store.claim_next(Timestamp::now()).await?;
/// assert_eq!(store.status_counts().publishing, 1);
/// ```
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxEvent>>,
    claims: Mutex<Vec<OutboxId>>,
    notifications: broadcast::Sender<ChangeNotification>,
}

/// Row counts per status (for test assertions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub publishing: usize,
    pub published: usize,
    pub failed: usize,
}

impl InMemoryOutboxStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            rows: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            notifications,
        }
    }

    /// Notifier fed by this store's inserts.
    pub fn notifier(&self) -> InMemoryChangeNotifier {
        InMemoryChangeNotifier::new(self.notifications.clone())
    }

    // === Test Helpers ===

    /// Returns a snapshot of every row in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn rows(&self) -> Vec<OutboxEvent> {
        self.rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned")
            .clone()
    }

    /// Returns the ids of every successful claim, in claim order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn claim_log(&self) -> Vec<OutboxId> {
        self.claims
            .lock()
            .expect("InMemoryOutboxStore: claims lock poisoned")
            .clone()
    }

    /// Returns row counts per status.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for row in self.rows() {
            match row.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Publishing => counts.publishing += 1,
                OutboxStatus::Published => counts.published += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Overwrites a row's lease timestamp (simulates a worker that crashed
    /// long ago).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn backdate_lease(&self, id: OutboxId, leased_at: Timestamp) {
        let mut rows = self
            .rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.leased_at = Some(leased_at);
        }
    }

    fn insert(
        rows: &mut Vec<OutboxEvent>,
        event: &NewOutboxEvent,
        now: Timestamp,
    ) -> Result<OutboxEvent, DomainError> {
        if rows.iter().any(|r| r.event_id == event.event_id) {
            return Err(DomainError::new(
                ErrorCode::DuplicateEvent,
                format!("Event id already staged: {}", event.event_id),
            )
            .with_detail("event_id", event.event_id.as_str()));
        }
        if rows.iter().any(|r| r.id == event.id) {
            return Err(DomainError::new(
                ErrorCode::DuplicateEvent,
                format!("Outbox id already staged: {}", event.id),
            ));
        }
        let row = OutboxEvent::staged(event.clone(), now);
        rows.push(row.clone());
        Ok(row)
    }

    fn notify(&self, row: &OutboxEvent) {
        // No receivers is fine: notifications are best effort.
        let _ = self.notifications.send(ChangeNotification {
            id: *row.id.as_uuid(),
            shard: row.shard_key.as_ref().map(|k| k.as_str().to_string()),
        });
    }

    fn eligible_index(rows: &[OutboxEvent], now: Timestamp) -> Option<usize> {
        rows.iter().enumerate().position(|(index, candidate)| {
            if !candidate.is_due(now) {
                return false;
            }
            let Some(key) = &candidate.shard_key else {
                return true;
            };
            !rows.iter().enumerate().any(|(other_index, other)| {
                other_index != index
                    && other.shard_key.as_ref() == Some(key)
                    && (other.status == OutboxStatus::Publishing
                        || (other.status == OutboxStatus::Pending && other_index < index))
            })
        })
    }

    fn publishing_row<'a>(
        rows: &'a mut [OutboxEvent],
        id: OutboxId,
    ) -> Result<&'a mut OutboxEvent, DomainError> {
        let row = rows.iter_mut().find(|r| r.id == id).ok_or_else(|| {
            DomainError::new(ErrorCode::EventNotFound, format!("Outbox event not found: {}", id))
        })?;
        if row.status != OutboxStatus::Publishing {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Outbox event {} is {}, not publishing", id, row.status),
            ));
        }
        Ok(row)
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxWriter for InMemoryOutboxStore {
    async fn write(&self, event: &NewOutboxEvent) -> Result<OutboxEvent, DomainError> {
        let row = {
            let mut rows = self
                .rows
                .lock()
                .expect("InMemoryOutboxStore: rows lock poisoned");
            Self::insert(&mut rows, event, Timestamp::now())?
        };
        self.notify(&row);
        Ok(row)
    }

    async fn write_batch(
        &self,
        events: &[NewOutboxEvent],
    ) -> Result<Vec<OutboxEvent>, DomainError> {
        let written = {
            let mut rows = self
                .rows
                .lock()
                .expect("InMemoryOutboxStore: rows lock poisoned");
            let mut staged = rows.clone();
            let now = Timestamp::now();
            let mut written = Vec::with_capacity(events.len());
            for event in events {
                written.push(Self::insert(&mut staged, event, now)?);
            }
            *rows = staged;
            written
        };
        for row in &written {
            self.notify(row);
        }
        Ok(written)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_next(&self, now: Timestamp) -> Result<Option<OutboxEvent>, DomainError> {
        let mut rows = self
            .rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let Some(index) = Self::eligible_index(&rows, now) else {
            return Ok(None);
        };

        let row = &mut rows[index];
        row.status = row.status.transition_to(OutboxStatus::Publishing)?;
        row.leased_at = Some(now);
        row.updated_at = now;

        self.claims
            .lock()
            .expect("InMemoryOutboxStore: claims lock poisoned")
            .push(row.id);
        Ok(Some(row.clone()))
    }

    async fn mark_published(&self, id: OutboxId, now: Timestamp) -> Result<(), DomainError> {
        let mut rows = self
            .rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let row = Self::publishing_row(&mut rows, id)?;
        row.status = OutboxStatus::Published;
        row.leased_at = None;
        row.updated_at = now;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: OutboxId,
        outcome: &FailureOutcome,
        error: &str,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let mut rows = self
            .rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let row = Self::publishing_row(&mut rows, id)?;
        apply_failure(row, outcome, error, now);
        Ok(())
    }

    async fn requeue_expired_leases(
        &self,
        leased_before: Timestamp,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Result<u64, DomainError> {
        let mut rows = self
            .rows
            .lock()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let mut requeued = 0;
        for row in rows.iter_mut() {
            let expired = row.status == OutboxStatus::Publishing
                && row.leased_at.map_or(true, |at| at < leased_before);
            if expired {
                let outcome = policy.on_failure(row.attempts, now);
                apply_failure(row, &outcome, "lease expired", now);
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn find_by_id(&self, id: OutboxId) -> Result<Option<OutboxEvent>, DomainError> {
        Ok(self.rows().into_iter().find(|r| r.id == id))
    }
}

#[async_trait]
impl DeadLetterReader for InMemoryOutboxStore {
    async fn list_failed(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError> {
        let mut failed: Vec<_> = self
            .rows()
            .into_iter()
            .filter(|r| r.status == OutboxStatus::Failed)
            .collect();
        failed.sort_by_key(|r| r.updated_at);
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn count_failed(&self) -> Result<u64, DomainError> {
        Ok(self.status_counts().failed as u64)
    }
}

fn apply_failure(row: &mut OutboxEvent, outcome: &FailureOutcome, error: &str, now: Timestamp) {
    match *outcome {
        FailureOutcome::Retry {
            attempts,
            next_attempt_at,
        } => {
            row.status = OutboxStatus::Pending;
            row.attempts = attempts;
            row.next_attempt_at = next_attempt_at;
        }
        FailureOutcome::Exhausted { attempts } => {
            row.status = OutboxStatus::Failed;
            row.attempts = attempts;
        }
    }
    row.leased_at = None;
    row.last_error = Some(error.to_string());
    row.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::EventId;
    use crate::domain::outbox::ShardKey;
    use std::time::Duration;

    fn event(event_id: &str) -> NewOutboxEvent {
        NewOutboxEvent::new("documents", EventId::parse(event_id).unwrap(), b"{}".to_vec()).unwrap()
    }

    fn sharded(event_id: &str, shard: &str) -> NewOutboxEvent {
        event(event_id).with_shard_key(ShardKey::parse(shard).unwrap())
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let store = InMemoryOutboxStore::new();
        store.write(&event("evt-1")).await.unwrap();

        let err = store.write(&event("evt-1")).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::DuplicateEvent);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn batch_with_duplicate_writes_nothing() {
        let store = InMemoryOutboxStore::new();
        let result = store.write_batch(&[event("evt-1"), event("evt-1")]).await;

        assert!(result.is_err());
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn claim_takes_oldest_due_row() {
        let store = InMemoryOutboxStore::new();
        let first = store.write(&event("evt-1")).await.unwrap();
        store.write(&event("evt-2")).await.unwrap();

        let claimed = store.claim_next(Timestamp::now()).await.unwrap().unwrap();

        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, OutboxStatus::Publishing);
        assert!(claimed.leased_at.is_some());
    }

    #[tokio::test]
    async fn claim_returns_none_without_work() {
        let store = InMemoryOutboxStore::new();
        assert!(store.claim_next(Timestamp::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_rows_not_yet_due() {
        let store = InMemoryOutboxStore::new();
        let later = Timestamp::now().plus(Duration::from_secs(60));
        store.write(&event("evt-1").available_at(later)).await.unwrap();

        assert!(store.claim_next(Timestamp::now()).await.unwrap().is_none());
        assert!(store.claim_next(later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn same_shard_waits_for_the_row_in_flight() {
        let store = InMemoryOutboxStore::new();
        let e1 = store.write(&sharded("evt-1", "district-7:doc-1")).await.unwrap();
        let e2 = store.write(&sharded("evt-2", "district-7:doc-1")).await.unwrap();
        let other = store.write(&sharded("evt-3", "district-7:doc-2")).await.unwrap();
        let now = Timestamp::now();

        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, e1.id);
        // e2 is blocked behind e1; the unrelated shard proceeds
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, other.id);
        assert!(store.claim_next(now).await.unwrap().is_none());

        store.mark_published(e1.id, now).await.unwrap();
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, e2.id);
    }

    #[tokio::test]
    async fn shard_head_in_backoff_blocks_later_rows() {
        let store = InMemoryOutboxStore::new();
        let e1 = store.write(&sharded("evt-1", "district-7:doc-1")).await.unwrap();
        store.write(&sharded("evt-2", "district-7:doc-1")).await.unwrap();
        let now = Timestamp::now();

        store.claim_next(now).await.unwrap();
        let retry = RetryPolicy::default().on_failure(0, now);
        store.record_failure(e1.id, &retry, "broker down", now).await.unwrap();

        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_requires_publishing() {
        let store = InMemoryOutboxStore::new();
        let row = store.write(&event("evt-1")).await.unwrap();

        let err = store.mark_published(row.id, Timestamp::now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStateTransition);

        let err = store
            .mark_published(OutboxId::new(), Timestamp::now())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EventNotFound);
    }

    #[tokio::test]
    async fn failure_outcomes_update_row() {
        let store = InMemoryOutboxStore::new();
        let row = store.write(&event("evt-1")).await.unwrap();
        let now = Timestamp::now();
        let policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(60));

        store.claim_next(now).await.unwrap();
        store
            .record_failure(row.id, &policy.on_failure(0, now), "timeout", now)
            .await
            .unwrap();
        let retried = store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(retried.status, OutboxStatus::Pending);
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.next_attempt_at, now.plus(Duration::from_secs(1)));
        assert_eq!(retried.last_error.as_deref(), Some("timeout"));

        let later = retried.next_attempt_at;
        store.claim_next(later).await.unwrap();
        store
            .record_failure(row.id, &policy.on_failure(1, later), "timeout", later)
            .await
            .unwrap();
        let failed = store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert_eq!(store.count_failed().await.unwrap(), 1);
        assert_eq!(store.list_failed(10).await.unwrap()[0].id, row.id);
    }

    #[tokio::test]
    async fn expired_leases_are_requeued() {
        let store = InMemoryOutboxStore::new();
        let stale = store.write(&event("evt-1")).await.unwrap();
        let fresh = store.write(&event("evt-2")).await.unwrap();
        let now = Timestamp::now();

        store.claim_next(now).await.unwrap();
        store.claim_next(now).await.unwrap();
        store.backdate_lease(stale.id, now.minus(Duration::from_secs(600)));

        let requeued = store
            .requeue_expired_leases(
                now.minus(Duration::from_secs(300)),
                &RetryPolicy::default(),
                now,
            )
            .await
            .unwrap();

        assert_eq!(requeued, 1);
        let stale = store.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, OutboxStatus::Pending);
        assert_eq!(stale.attempts, 1);
        let fresh = store.find_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, OutboxStatus::Publishing);
    }

    #[tokio::test]
    async fn inserts_are_broadcast_to_subscribers() {
        let store = InMemoryOutboxStore::new();
        let mut receiver = store.notifications.subscribe();

        let row = store.write(&sharded("evt-1", "district-7:doc-1")).await.unwrap();

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.id, *row.id.as_uuid());
        assert_eq!(notification.shard.as_deref(), Some("district-7:doc-1"));
    }
}
