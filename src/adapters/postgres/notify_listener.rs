//! LISTEN/NOTIFY change notifier.
//!
//! The `outbox_events_notify` trigger publishes `{"id": .., "shard": ..}` on
//! every committed insert. This adapter turns a dedicated listener connection
//! into a [`NotificationStream`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{ChangeNotification, ChangeNotifier, NotificationStream};

/// PostgreSQL implementation of ChangeNotifier.
#[derive(Clone)]
pub struct PgChangeNotifier {
    pool: PgPool,
}

impl PgChangeNotifier {
    /// Creates a notifier that opens listener connections from `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeNotifier for PgChangeNotifier {
    async fn subscribe(&self, channel: &str) -> Result<NotificationStream, DomainError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| notification_error("open listener connection", e))?;

        listener
            .listen(channel)
            .await
            .map_err(|e| notification_error("listen on channel", e))?;

        debug!(channel, "Subscribed to outbox notifications");

        let notifications = stream::unfold(Some(listener), |state| async move {
            let mut listener = state?;
            loop {
                match listener.recv().await {
                    Ok(notification) => match parse_payload(notification.payload()) {
                        Some(parsed) => return Some((Ok(parsed), Some(listener))),
                        None => continue,
                    },
                    Err(err) => {
                        return Some((Err(notification_error("receive notification", err)), None))
                    }
                }
            }
        });

        Ok(notifications.boxed())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helper functions
// ════════════════════════════════════════════════════════════════════════════

/// Malformed payloads are skipped; the poll timer still covers the row.
fn parse_payload(payload: &str) -> Option<ChangeNotification> {
    match serde_json::from_str(payload) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(error = %err, payload, "Ignoring malformed outbox notification");
            None
        }
    }
}

fn notification_error(operation: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(
        ErrorCode::NotificationError,
        format!("Failed to {}: {}", operation, err),
    )
}
