//! Outbox rows and the producer-side insert request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{EventId, OutboxId, Timestamp, ValidationError};

use super::OutboxStatus;

/// Deterministic grouping key for events about one business entity.
///
/// Conventionally `tenant:entity`, e.g. `district-7:document-42`. All events
/// sharing a key are delivered in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    /// Builds the key for an entity inside a tenant.
    pub fn for_entity(tenant: &str, entity: &str) -> Result<Self, ValidationError> {
        if tenant.trim().is_empty() {
            return Err(ValidationError::empty_field("shard_key.tenant"));
        }
        if entity.trim().is_empty() {
            return Err(ValidationError::empty_field("shard_key.entity"));
        }
        Ok(Self(format!("{}:{}", tenant, entity)))
    }

    /// Wraps a pre-built key.
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(ValidationError::empty_field("shard_key"));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Multi-tenant attribution attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
}

impl TenantScope {
    pub fn district(district_id: impl Into<String>) -> Self {
        Self {
            district_id: Some(district_id.into()),
            school_id: None,
        }
    }

    pub fn with_school(mut self, school_id: impl Into<String>) -> Self {
        self.school_id = Some(school_id.into());
        self
    }
}

/// A staged domain event together with its delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub ordering_key: Option<String>,
    pub shard_key: Option<ShardKey>,
    pub event_id: EventId,
    pub correlation_id: Option<String>,
    pub tenant: TenantScope,
    pub next_attempt_at: Timestamp,
    pub leased_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl OutboxEvent {
    /// Materializes the row a producer insert creates.
    pub fn staged(new: NewOutboxEvent, now: Timestamp) -> Self {
        Self {
            id: new.id,
            topic: new.topic,
            payload: new.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            ordering_key: new.ordering_key,
            shard_key: new.shard_key,
            event_id: new.event_id,
            correlation_id: new.correlation_id,
            tenant: new.tenant,
            next_attempt_at: new.available_at.unwrap_or(now),
            leased_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when a claim at `now` may lease this row, ignoring shard ordering.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }

    /// The ordering key the broker should enforce, if any.
    pub fn effective_ordering_key(&self) -> Option<&str> {
        self.ordering_key
            .as_deref()
            .or_else(|| self.shard_key.as_ref().map(ShardKey::as_str))
    }
}

/// Producer request to stage one event inside its business transaction.
///
/// # Example
///
/// ```ignore
/// let mut tx = pool.begin().await?;
/// documents.save_in_txn(&doc, &mut tx).await?;
///
/// let event = NewOutboxEvent::json("document.analyzed", EventId::new(), &payload)?
///     .with_shard_key(ShardKey::for_entity(&district, &doc.id)?)
///     .with_tenant(TenantScope::district(&district));
/// outbox.write_in_txn(&mut tx, &event).await?;
///
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub id: OutboxId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub event_id: EventId,
    pub ordering_key: Option<String>,
    pub shard_key: Option<ShardKey>,
    pub correlation_id: Option<String>,
    pub tenant: TenantScope,
    /// Earliest delivery time; defaults to the insert time.
    pub available_at: Option<Timestamp>,
}

impl NewOutboxEvent {
    /// Creates an insert request with an opaque payload.
    pub fn new(
        topic: impl Into<String>,
        event_id: EventId,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, ValidationError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ValidationError::empty_field("topic"));
        }
        Ok(Self {
            id: OutboxId::new(),
            topic,
            payload: payload.into(),
            event_id,
            ordering_key: None,
            shard_key: None,
            correlation_id: None,
            tenant: TenantScope::default(),
            available_at: None,
        })
    }

    /// Creates an insert request whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        event_id: EventId,
        value: &T,
    ) -> Result<Self, ValidationError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?;
        Self::new(topic, event_id, payload)
    }

    /// Sets the shard key and, unless already set, the ordering key.
    pub fn with_shard_key(mut self, shard_key: ShardKey) -> Self {
        if self.ordering_key.is_none() {
            self.ordering_key = Some(shard_key.as_str().to_string());
        }
        self.shard_key = Some(shard_key);
        self
    }

    pub fn with_ordering_key(mut self, ordering_key: impl Into<String>) -> Self {
        self.ordering_key = Some(ordering_key.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant: TenantScope) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn available_at(mut self, at: Timestamp) -> Self {
        self.available_at = Some(at);
        self
    }
}
