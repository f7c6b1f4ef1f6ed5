//! ChangeNotifier port - Optional push signal for new outbox rows.
//!
//! Notifications are a latency optimization only. They may be dropped,
//! coalesced, or missed between subscribing and an insert; the relay's poll
//! interval guarantees eventual pickup regardless.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::foundation::DomainError;

/// Notification payload: enough to decide whether to act, never the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub id: Uuid,
    pub shard: Option<String>,
}

/// Stream of notifications; an `Err` item or the end of the stream means
/// the subscription is gone and the caller should re-subscribe.
pub type NotificationStream = BoxStream<'static, Result<ChangeNotification, DomainError>>;

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<NotificationStream, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_decodes_trigger_payload() {
        let payload = r#"{"id":"8f2b7f4e-1c55-4c1e-9e4b-6a1f5f0d2c11","shard":"district-7:document-42"}"#;
        let notification: ChangeNotification = serde_json::from_str(payload).unwrap();

        assert_eq!(notification.shard.as_deref(), Some("district-7:document-42"));
    }

    #[test]
    fn notification_accepts_null_shard() {
        let payload = r#"{"id":"8f2b7f4e-1c55-4c1e-9e4b-6a1f5f0d2c11","shard":null}"#;
        let notification: ChangeNotification = serde_json::from_str(payload).unwrap();

        assert!(notification.shard.is_none());
    }
}
