//! OutboxRelay - One claim → publish → finalize step.
//!
//! This is the retry/failure state machine in motion:
//!
//! | From       | Event                          | To         |
//! |------------|--------------------------------|------------|
//! | pending    | claimed                        | publishing |
//! | publishing | publish succeeds               | published  |
//! | publishing | publish fails, attempts left   | pending    |
//! | publishing | publish fails, attempts used   | failed     |
//!
//! The relay holds no database locks while the broker call is in flight; the
//! `publishing` status is the lease.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::foundation::{DomainError, EventId, OutboxId, Timestamp};
use crate::domain::outbox::{FailureOutcome, MessageIdentity, OutboundMessage, RetryPolicy};
use crate::ports::{MessagePublisher, OutboxStore};

/// What a single [`OutboxRelay::process_next`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No eligible row.
    Idle,
    Published {
        id: OutboxId,
        event_id: EventId,
    },
    /// Publish failed; the row is pending again with a later `next_attempt_at`.
    Retried {
        id: OutboxId,
        event_id: EventId,
        attempts: u32,
        next_attempt_at: Timestamp,
    },
    /// Publish failed for the last allowed time; the row is `failed`.
    Failed {
        id: OutboxId,
        event_id: EventId,
        attempts: u32,
    },
}

impl RelayOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, RelayOutcome::Idle)
    }
}

/// Drives one outbox row at a time from `pending` to a finalized state.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn MessagePublisher>,
    policy: RetryPolicy,
    identity: MessageIdentity,
}

impl OutboxRelay {
    /// Create a relay with the default retry policy and message identity.
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            store,
            publisher,
            policy: RetryPolicy::default(),
            identity: MessageIdentity::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Producer and schema version tags stamped on every outbound message.
    pub fn with_identity(mut self, identity: MessageIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Claim the oldest eligible row, publish it, and record the result.
    ///
    /// Storage errors are returned as-is. A row whose finalize failed stays
    /// `publishing` until the lease sweeper reclaims it.
    pub async fn process_next(&self) -> Result<RelayOutcome, DomainError> {
        let event = match self.store.claim_next(Timestamp::now()).await? {
            Some(event) => event,
            None => return Ok(RelayOutcome::Idle),
        };

        debug!(
            outbox_id = %event.id,
            event_id = %event.event_id,
            topic = %event.topic,
            attempts = event.attempts,
            "Claimed outbox event"
        );

        let message = OutboundMessage::from_event(&event, &self.identity);

        match self.publisher.publish(&message).await {
            Ok(receipt) => {
                self.store.mark_published(event.id, Timestamp::now()).await?;
                debug!(
                    outbox_id = %event.id,
                    event_id = %event.event_id,
                    topic = %event.topic,
                    message_id = %receipt.message_id,
                    "Published outbox event"
                );
                Ok(RelayOutcome::Published {
                    id: event.id,
                    event_id: event.event_id,
                })
            }
            Err(publish_err) => {
                let now = Timestamp::now();
                let outcome = self.policy.on_failure(event.attempts, now);
                let error_msg = publish_err.to_string();

                self.store
                    .record_failure(event.id, &outcome, &error_msg, now)
                    .await?;

                match outcome {
                    FailureOutcome::Retry {
                        attempts,
                        next_attempt_at,
                    } => {
                        warn!(
                            outbox_id = %event.id,
                            event_id = %event.event_id,
                            topic = %event.topic,
                            attempts,
                            next_attempt_at = %next_attempt_at.as_datetime(),
                            error = %error_msg,
                            "Publish failed, retry scheduled"
                        );
                        Ok(RelayOutcome::Retried {
                            id: event.id,
                            event_id: event.event_id,
                            attempts,
                            next_attempt_at,
                        })
                    }
                    FailureOutcome::Exhausted { attempts } => {
                        error!(
                            outbox_id = %event.id,
                            event_id = %event.event_id,
                            topic = %event.topic,
                            attempts,
                            error = %error_msg,
                            "Publish failed, attempts exhausted"
                        );
                        Ok(RelayOutcome::Failed {
                            id: event.id,
                            event_id: event.event_id,
                            attempts,
                        })
                    }
                }
            }
        }
    }
}
