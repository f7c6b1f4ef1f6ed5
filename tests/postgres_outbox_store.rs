//! PostgreSQL integration tests for `PostgresOutboxStore` and `PgChangeNotifier`.
//!
//! These tests need a disposable database:
//!
//! ```text
//! OUTBOX_RELAY_TEST_DATABASE_URL=postgres://localhost/outbox_relay_test \
//!     cargo test --test postgres_outbox_store -- --ignored
//! ```
//!
//! Every test truncates `outbox_events`, so they are serialized with a lock.

use futures::StreamExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use outbox_relay::adapters::{PgChangeNotifier, PostgresOutboxStore};
use outbox_relay::domain::foundation::{ErrorCode, EventId, OutboxId, Timestamp};
use outbox_relay::domain::outbox::{
    FailureOutcome, NewOutboxEvent, OutboxStatus, RetryPolicy, ShardKey, TenantScope,
};
use outbox_relay::ports::{ChangeNotifier, DeadLetterReader, OutboxStore, OutboxWriter};

static DB_LOCK: Mutex<()> = Mutex::new(());

// =============================================================================
// Test Infrastructure
// =============================================================================

async fn setup() -> (PgPool, PostgresOutboxStore, MutexGuard<'static, ()>) {
    let guard = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let url = std::env::var("OUTBOX_RELAY_TEST_DATABASE_URL")
        .expect("OUTBOX_RELAY_TEST_DATABASE_URL must be set for database tests");

    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    sqlx::query("TRUNCATE outbox_events")
        .execute(&pool)
        .await
        .expect("Failed to truncate outbox_events");

    let store = PostgresOutboxStore::new(pool.clone());
    (pool, store, guard)
}

fn event(event_id: &str) -> NewOutboxEvent {
    NewOutboxEvent::new("documents", EventId::parse(event_id).unwrap(), b"{}".to_vec()).unwrap()
}

fn sharded(event_id: &str, entity: &str) -> NewOutboxEvent {
    event(event_id).with_shard_key(ShardKey::for_entity("district-7", entity).unwrap())
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(1), Duration::from_secs(60))
}

fn assert_close(actual: Timestamp, expected: Timestamp) {
    let drift = (*actual.as_datetime() - *expected.as_datetime())
        .num_milliseconds()
        .abs();
    assert!(drift < 50, "timestamps differ by {}ms", drift);
}

// =============================================================================
// Producer Contract
// =============================================================================

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn write_round_trips_every_column() {
    let (_pool, store, _guard) = setup().await;

    let staged = store
        .write(
            &sharded("evt-1", "document-42")
                .with_correlation_id("req-9")
                .with_tenant(TenantScope::district("district-7").with_school("school-3")),
        )
        .await
        .unwrap();

    let row = store.find_by_id(staged.id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.attempts, 0);
    assert_eq!(row.event_id.as_str(), "evt-1");
    assert_eq!(row.correlation_id.as_deref(), Some("req-9"));
    assert_eq!(row.tenant.school_id.as_deref(), Some("school-3"));
    assert_eq!(row.effective_ordering_key(), Some("district-7:document-42"));
    assert!(row.leased_at.is_none());
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn duplicate_event_id_maps_to_duplicate_event() {
    let (_pool, store, _guard) = setup().await;
    store.write(&event("evt-dup")).await.unwrap();

    let err = store.write(&event("evt-dup")).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::DuplicateEvent);
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn rolled_back_transaction_leaves_no_row() {
    let (pool, store, _guard) = setup().await;

    let mut tx = pool.begin().await.unwrap();
    let staged = store.write_in_txn(&mut tx, &event("evt-rollback")).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find_by_id(staged.id).await.unwrap().is_none());
    assert!(store.claim_next(Timestamp::now()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn batch_with_duplicate_writes_nothing() {
    let (_pool, store, _guard) = setup().await;

    let result = store
        .write_batch(&[event("evt-x"), event("evt-y"), event("evt-x")])
        .await;

    assert_eq!(result.unwrap_err().code, ErrorCode::DuplicateEvent);
    assert!(store.claim_next(Timestamp::now()).await.unwrap().is_none());
}

// =============================================================================
// Lease Manager
// =============================================================================

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn claim_is_fifo_and_sets_lease() {
    let (_pool, store, _guard) = setup().await;
    let first = store
        .write_batch(&[event("evt-1"), event("evt-2")])
        .await
        .unwrap();

    let now = Timestamp::now();
    let claimed = store.claim_next(now).await.unwrap().unwrap();

    assert_eq!(claimed.id, first[0].id);
    assert_eq!(claimed.status, OutboxStatus::Publishing);
    assert_close(claimed.leased_at.unwrap(), now);
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn concurrent_claims_never_share_a_row() {
    let (_pool, store, _guard) = setup().await;
    let batch: Vec<_> = (0..30).map(|i| event(&format!("evt-{}", i))).collect();
    store.write_batch(&batch).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(row) = store.claim_next(Timestamp::now()).await.unwrap() {
                claimed.push(row.id);
            }
            claimed
        }));
    }

    let mut all: Vec<OutboxId> = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    assert_eq!(all.len(), 30);
    assert_eq!(all.iter().collect::<HashSet<_>>().len(), 30);
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn shard_head_of_line_gates_later_rows() {
    let (_pool, store, _guard) = setup().await;
    let rows = store
        .write_batch(&[
            sharded("a-1", "document-1"),
            sharded("a-2", "document-1"),
            sharded("b-1", "document-2"),
        ])
        .await
        .unwrap();
    let now = Timestamp::now();

    let first = store.claim_next(now).await.unwrap().unwrap();
    let second = store.claim_next(now).await.unwrap().unwrap();
    assert_eq!(first.id, rows[0].id);
    assert_eq!(second.id, rows[2].id, "a-2 must wait for a-1");
    assert!(store.claim_next(now).await.unwrap().is_none());

    store.mark_published(first.id, now).await.unwrap();
    let third = store.claim_next(now).await.unwrap().unwrap();
    assert_eq!(third.id, rows[1].id);
}

// =============================================================================
// Finalization
// =============================================================================

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn finalize_requires_publishing_status() {
    let (_pool, store, _guard) = setup().await;
    let staged = store.write(&event("evt-1")).await.unwrap();

    let err = store
        .mark_published(staged.id, Timestamp::now())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidStateTransition);

    let err = store
        .mark_published(OutboxId::new(), Timestamp::now())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::EventNotFound);
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn retry_outcome_defers_next_claim() {
    let (_pool, store, _guard) = setup().await;
    store.write(&event("evt-1")).await.unwrap();
    let now = Timestamp::now();
    let claimed = store.claim_next(now).await.unwrap().unwrap();

    let outcome = policy(5).on_failure(claimed.attempts, now);
    store
        .record_failure(claimed.id, &outcome, "broker unavailable", now)
        .await
        .unwrap();

    let row = store.find_by_id(claimed.id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.last_error.as_deref(), Some("broker unavailable"));
    assert!(store.claim_next(now).await.unwrap().is_none());
    assert!(store
        .claim_next(now.plus(Duration::from_secs(2)))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn exhausted_row_is_failed_and_listed() {
    let (_pool, store, _guard) = setup().await;
    store.write(&event("evt-poison")).await.unwrap();
    let now = Timestamp::now();
    let claimed = store.claim_next(now).await.unwrap().unwrap();

    store
        .record_failure(
            claimed.id,
            &FailureOutcome::Exhausted { attempts: 5 },
            "schema mismatch",
            now,
        )
        .await
        .unwrap();

    assert!(store
        .claim_next(now.plus(Duration::from_secs(3600)))
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.count_failed().await.unwrap(), 1);
    let failed = store.list_failed(10).await.unwrap();
    assert_eq!(failed[0].id, claimed.id);
    assert_eq!(failed[0].attempts, 5);
}

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn expired_leases_are_requeued_with_backoff_or_failed() {
    let (pool, store, _guard) = setup().await;
    store
        .write_batch(&[event("evt-1"), event("evt-2")])
        .await
        .unwrap();
    let leased_at = Timestamp::now();
    let one = store.claim_next(leased_at).await.unwrap().unwrap();
    let two = store.claim_next(leased_at).await.unwrap().unwrap();

    // Second lease already used its last attempt.
    sqlx::query("UPDATE outbox_events SET attempts = 4 WHERE id = $1")
        .bind(*two.id.as_uuid())
        .execute(&pool)
        .await
        .unwrap();

    let now = leased_at.plus(Duration::from_secs(600));
    let requeued = store
        .requeue_expired_leases(now.minus(Duration::from_secs(300)), &policy(5), now)
        .await
        .unwrap();
    assert_eq!(requeued, 2);

    let one = store.find_by_id(one.id).await.unwrap().unwrap();
    assert_eq!(one.status, OutboxStatus::Pending);
    assert_eq!(one.attempts, 1);
    assert_eq!(one.last_error.as_deref(), Some("lease expired"));
    assert_close(one.next_attempt_at, now.plus(Duration::from_secs(1)));

    let two = store.find_by_id(two.id).await.unwrap().unwrap();
    assert_eq!(two.status, OutboxStatus::Failed);
    assert_eq!(two.attempts, 5);
}

// =============================================================================
// Change Notifier
// =============================================================================

#[tokio::test]
#[ignore = "requires OUTBOX_RELAY_TEST_DATABASE_URL"]
async fn insert_trigger_notifies_listener() {
    let (pool, store, _guard) = setup().await;
    let notifier = PgChangeNotifier::new(pool.clone());
    let mut notifications = notifier.subscribe("outbox_events").await.unwrap();

    let staged = store
        .write(&sharded("evt-notify", "document-42"))
        .await
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.next())
        .await
        .expect("no notification within 5s")
        .unwrap()
        .unwrap();
    assert_eq!(notification.id, *staged.id.as_uuid());
    assert_eq!(notification.shard.as_deref(), Some("district-7:document-42"));
}
