//! PostgreSQL implementation of the outbox ports.
//!
//! One adapter serves both sides of the `outbox_events` table: producers stage
//! rows through [`OutboxWriter`] / [`PostgresOutboxStore::write_in_txn`], the
//! relay leases and finalizes them through [`OutboxStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, EventId, OutboxId, Timestamp};
use crate::domain::outbox::{
    FailureOutcome, NewOutboxEvent, OutboxEvent, OutboxStatus, RetryPolicy, ShardKey, TenantScope,
};
use crate::ports::{DeadLetterReader, OutboxStore, OutboxWriter};

/// Upper bound on the backoff exponent evaluated in SQL, keeps `power()`
/// inside interval range.
const MAX_SQL_BACKOFF_EXPONENT: i32 = 30;

const UNIQUE_VIOLATION: &str = "23505";

macro_rules! outbox_columns {
    () => {
        "id, topic, payload, status, attempts, ordering_key, shard_key, event_id, \
         correlation_id, district_id, school_id, next_attempt_at, leased_at, last_error, \
         created_at, updated_at"
    };
}

/// PostgreSQL implementation of OutboxWriter, OutboxStore and DeadLetterReader.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgresOutboxStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stage an event inside the caller's business transaction.
    ///
    /// The row becomes visible to the relay (and the insert notification
    /// fires) only when the caller commits.
    pub async fn write_in_txn(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &NewOutboxEvent,
    ) -> Result<OutboxEvent, DomainError> {
        insert_event(&mut **tx, event).await
    }
}

#[async_trait]
impl OutboxWriter for PostgresOutboxStore {
    async fn write(&self, event: &NewOutboxEvent) -> Result<OutboxEvent, DomainError> {
        insert_event(&self.pool, event).await
    }

    async fn write_batch(
        &self,
        events: &[NewOutboxEvent],
    ) -> Result<Vec<OutboxEvent>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database("begin outbox transaction", e))?;

        let mut written = Vec::with_capacity(events.len());
        for event in events {
            written.push(self.write_in_txn(&mut tx, event).await?);
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::database("commit outbox transaction", e))?;

        Ok(written)
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn claim_next(&self, now: Timestamp) -> Result<Option<OutboxEvent>, DomainError> {
        // Single statement: select + lock + flip. Rows locked by a concurrent
        // claim are skipped, so N workers lease N different rows.
        let row: Option<OutboxEventRow> = sqlx::query_as(
            r#"
            UPDATE outbox_events AS o
            SET status = 'publishing',
                leased_at = $1,
                updated_at = $1
            FROM (
                SELECT e.id
                FROM outbox_events e
                WHERE e.status = 'pending'
                  AND e.next_attempt_at <= $1
                  AND (
                      e.shard_key IS NULL
                      OR NOT EXISTS (
                          SELECT 1
                          FROM outbox_events p
                          WHERE p.shard_key = e.shard_key
                            AND p.id <> e.id
                            AND (
                                p.status = 'publishing'
                                OR (p.status = 'pending'
                                    AND (p.created_at, p.seq) < (e.created_at, e.seq))
                            )
                      )
                  )
                ORDER BY e.created_at, e.seq
                LIMIT 1
                FOR UPDATE OF e SKIP LOCKED
            ) AS next
            WHERE o.id = next.id
            RETURNING o.*
            "#,
        )
        .bind(*now.as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("claim outbox event", e))?;

        row.map(OutboxEvent::try_from).transpose()
    }

    async fn mark_published(&self, id: OutboxId, now: Timestamp) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events SET
                status = 'published',
                leased_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'publishing'
            "#,
        )
        .bind(*id.as_uuid())
        .bind(*now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("mark outbox event published", e))?;

        if result.rows_affected() == 0 {
            return Err(self.not_publishing(id).await);
        }

        Ok(())
    }

    async fn record_failure(
        &self,
        id: OutboxId,
        outcome: &FailureOutcome,
        error: &str,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let query = match *outcome {
            FailureOutcome::Retry {
                attempts,
                next_attempt_at,
            } => sqlx::query(
                r#"
                UPDATE outbox_events SET
                    status = 'pending',
                    attempts = $2,
                    next_attempt_at = $3,
                    last_error = $4,
                    leased_at = NULL,
                    updated_at = $5
                WHERE id = $1 AND status = 'publishing'
                "#,
            )
            .bind(*id.as_uuid())
            .bind(attempts_to_db(attempts))
            .bind(*next_attempt_at.as_datetime()),
            FailureOutcome::Exhausted { attempts } => sqlx::query(
                r#"
                UPDATE outbox_events SET
                    status = 'failed',
                    attempts = $2,
                    last_error = $3,
                    leased_at = NULL,
                    updated_at = $4
                WHERE id = $1 AND status = 'publishing'
                "#,
            )
            .bind(*id.as_uuid())
            .bind(attempts_to_db(attempts)),
        };

        let result = query
            .bind(error)
            .bind(*now.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database("record outbox publish failure", e))?;

        if result.rows_affected() == 0 {
            return Err(self.not_publishing(id).await);
        }

        Ok(())
    }

    async fn requeue_expired_leases(
        &self,
        leased_before: Timestamp,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Result<u64, DomainError> {
        // Right-hand sides see the pre-update `attempts`, so the delay is
        // base * 2^(new_attempts - 1), matching RetryPolicy.
        let result = sqlx::query(
            r#"
            UPDATE outbox_events SET
                attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE 'pending' END,
                next_attempt_at = CASE
                    WHEN attempts + 1 >= $2 THEN next_attempt_at
                    ELSE $3 + LEAST(
                        make_interval(secs => $4 * power(2, LEAST(attempts, $6))),
                        make_interval(secs => $5)
                    )
                END,
                last_error = 'lease expired',
                leased_at = NULL,
                updated_at = $3
            WHERE status = 'publishing'
              AND (leased_at IS NULL OR leased_at < $1)
            "#,
        )
        .bind(*leased_before.as_datetime())
        .bind(attempts_to_db(policy.max_attempts()))
        .bind(*now.as_datetime())
        .bind(policy.base_delay().as_secs_f64())
        .bind(policy.max_delay().as_secs_f64())
        .bind(MAX_SQL_BACKOFF_EXPONENT)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("requeue expired outbox leases", e))?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: OutboxId) -> Result<Option<OutboxEvent>, DomainError> {
        let row: Option<OutboxEventRow> = sqlx::query_as(concat!(
            "SELECT ",
            outbox_columns!(),
            " FROM outbox_events WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("fetch outbox event", e))?;

        row.map(OutboxEvent::try_from).transpose()
    }
}

#[async_trait]
impl DeadLetterReader for PostgresOutboxStore {
    async fn list_failed(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError> {
        let rows: Vec<OutboxEventRow> = sqlx::query_as(concat!(
            "SELECT ",
            outbox_columns!(),
            " FROM outbox_events WHERE status = 'failed' ORDER BY updated_at, seq LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("list failed outbox events", e))?;

        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    async fn count_failed(&self) -> Result<u64, DomainError> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DomainError::database("count failed outbox events", e))?;

        Ok(result.0.max(0) as u64)
    }
}

impl PostgresOutboxStore {
    /// Builds the error for a finalize that matched no `publishing` row.
    async fn not_publishing(&self, id: OutboxId) -> DomainError {
        match self.find_by_id(id).await {
            Ok(Some(row)) => DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Outbox event {} is {}, not publishing", id, row.status),
            ),
            Ok(None) => DomainError::new(
                ErrorCode::EventNotFound,
                format!("Outbox event not found: {}", id),
            ),
            Err(err) => err,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helper functions
// ════════════════════════════════════════════════════════════════════════════

async fn insert_event<'e, E>(
    executor: E,
    event: &NewOutboxEvent,
) -> Result<OutboxEvent, DomainError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: OutboxEventRow = sqlx::query_as(concat!(
        r#"
        INSERT INTO outbox_events (
            id, topic, payload, event_id, ordering_key, shard_key,
            correlation_id, district_id, school_id, next_attempt_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, NOW()))
        RETURNING "#,
        outbox_columns!()
    ))
    .bind(*event.id.as_uuid())
    .bind(&event.topic)
    .bind(&event.payload)
    .bind(event.event_id.as_str())
    .bind(event.ordering_key.as_deref())
    .bind(event.shard_key.as_ref().map(ShardKey::as_str))
    .bind(event.correlation_id.as_deref())
    .bind(event.tenant.district_id.as_deref())
    .bind(event.tenant.school_id.as_deref())
    .bind(event.available_at.map(|at| *at.as_datetime()))
    .fetch_one(executor)
    .await
    .map_err(|e| insert_error(e, event))?;

    OutboxEvent::try_from(row)
}

fn insert_error(err: sqlx::Error, event: &NewOutboxEvent) -> DomainError {
    let is_unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION);

    if is_unique_violation {
        DomainError::new(
            ErrorCode::DuplicateEvent,
            format!("Event id already staged: {}", event.event_id),
        )
        .with_detail("event_id", event.event_id.as_str())
    } else {
        DomainError::database("insert outbox event", err)
    }
}

fn attempts_to_db(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxEventRow {
    id: Uuid,
    topic: String,
    payload: Vec<u8>,
    status: String,
    attempts: i32,
    ordering_key: Option<String>,
    shard_key: Option<String>,
    event_id: String,
    correlation_id: Option<String>,
    district_id: Option<String>,
    school_id: Option<String>,
    next_attempt_at: DateTime<Utc>,
    leased_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = DomainError;

    fn try_from(row: OutboxEventRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, err: &dyn std::fmt::Display| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid {} on outbox event {}: {}", field, row.id, err),
            )
        };

        let status: OutboxStatus = row.status.parse().map_err(|e| corrupt("status", &e))?;
        let event_id = EventId::parse(row.event_id.clone()).map_err(|e| corrupt("event_id", &e))?;
        let shard_key = row
            .shard_key
            .clone()
            .map(ShardKey::parse)
            .transpose()
            .map_err(|e| corrupt("shard_key", &e))?;

        Ok(OutboxEvent {
            id: OutboxId::from_uuid(row.id),
            topic: row.topic,
            payload: row.payload,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            ordering_key: row.ordering_key,
            shard_key,
            event_id,
            correlation_id: row.correlation_id,
            tenant: TenantScope {
                district_id: row.district_id,
                school_id: row.school_id,
            },
            next_attempt_at: Timestamp::from_datetime(row.next_attempt_at),
            leased_at: row.leased_at.map(Timestamp::from_datetime),
            last_error: row.last_error,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}
