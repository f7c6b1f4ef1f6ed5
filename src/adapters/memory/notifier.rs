//! In-memory change notifier backed by a tokio broadcast channel.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{ChangeNotification, ChangeNotifier, NotificationStream};

/// Delivers notifications sent by an [`InMemoryOutboxStore`](super::InMemoryOutboxStore).
///
/// The channel name is ignored; one store has exactly one channel. A lagging
/// subscriber ends its stream with an error, the same way a dropped database
/// connection would.
#[derive(Clone)]
pub struct InMemoryChangeNotifier {
    sender: broadcast::Sender<ChangeNotification>,
}

impl InMemoryChangeNotifier {
    pub fn new(sender: broadcast::Sender<ChangeNotification>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ChangeNotifier for InMemoryChangeNotifier {
    async fn subscribe(&self, _channel: &str) -> Result<NotificationStream, DomainError> {
        let receiver = self.sender.subscribe();

        let notifications = stream::unfold(Some(receiver), |state| async move {
            let mut receiver = state?;
            match receiver.recv().await {
                Ok(notification) => Some((Ok(notification), Some(receiver))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "In-memory notification subscriber lagged");
                    let err = DomainError::new(
                        ErrorCode::NotificationError,
                        format!("Subscriber lagged by {} notifications", skipped),
                    );
                    Some((Err(err), None))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(notifications.boxed())
    }
}
