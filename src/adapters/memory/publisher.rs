//! In-memory message publisher for testing.
//!
//! Captures every accepted message for assertions and can be scripted to
//! fail, either for the next N calls or for specific event ids.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in production.
//! It uses `.expect()` on lock operations which will panic if locks are poisoned.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::foundation::DomainError;
use crate::domain::outbox::OutboundMessage;
use crate::ports::{MessagePublisher, PublishReceipt};

/// In-memory broker stand-in.
///
/// # Example
///
/// ```ignore
/// let publisher = Arc::new(InMemoryPublisher::new());
/// publisher.fail_next(2);
///
/// // ... run the relay ...
///
/// assert_eq!(publisher.published_count(), 1);
/// assert_eq!(publisher.attempt_count(), 3);
/// ```
pub struct InMemoryPublisher {
    published: Mutex<Vec<OutboundMessage>>,
    scripted_failures: Mutex<VecDeque<String>>,
    failing_event_ids: Mutex<HashMap<String, String>>,
    attempts: AtomicU64,
    latency: Option<Duration>,
}

impl InMemoryPublisher {
    /// Creates a publisher that accepts every message.
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            failing_event_ids: Mutex::new(HashMap::new()),
            attempts: AtomicU64::new(0),
            latency: None,
        }
    }

    /// Simulates network latency on every publish call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `count` publish calls fail, whatever the message.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_next(&self, count: usize) {
        let mut failures = self
            .scripted_failures
            .lock()
            .expect("InMemoryPublisher: failures lock poisoned");
        for n in 0..count {
            failures.push_back(format!("scripted broker failure #{}", n + 1));
        }
    }

    /// Every publish of `event_id` fails with `reason`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn reject_event(&self, event_id: impl Into<String>, reason: impl Into<String>) {
        self.failing_event_ids
            .lock()
            .expect("InMemoryPublisher: rejections lock poisoned")
            .insert(event_id.into(), reason.into());
    }

    // === Test Helpers ===

    /// Returns accepted messages in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn published_messages(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .expect("InMemoryPublisher: published lock poisoned")
            .clone()
    }

    /// Returns event ids of accepted messages in publish order.
    pub fn published_event_ids(&self) -> Vec<String> {
        self.published_messages()
            .iter()
            .filter_map(|m| m.event_id().map(str::to_string))
            .collect()
    }

    /// Returns count of accepted messages.
    pub fn published_count(&self) -> usize {
        self.published_messages().len()
    }

    /// Returns count of publish calls, successful or not.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, message: &OutboundMessage) -> Option<String> {
        if let Some(reason) = self
            .scripted_failures
            .lock()
            .expect("InMemoryPublisher: failures lock poisoned")
            .pop_front()
        {
            return Some(reason);
        }
        let event_id = message.event_id()?;
        self.failing_event_ids
            .lock()
            .expect("InMemoryPublisher: rejections lock poisoned")
            .get(event_id)
            .cloned()
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt, DomainError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(reason) = self.scripted_failure(message) {
            return Err(DomainError::broker(reason).with_detail("topic", message.topic.clone()));
        }

        self.published
            .lock()
            .expect("InMemoryPublisher: published lock poisoned")
            .push(message.clone());

        Ok(PublishReceipt {
            message_id: format!("mem-{}", attempt),
        })
    }
}
