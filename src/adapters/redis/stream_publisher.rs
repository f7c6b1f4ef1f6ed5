//! Redis Streams message publisher for production deployments.
//!
//! Every topic maps to one stream, `<prefix><topic>`. A message becomes a
//! single stream entry:
//!
//! | Field         | Value                                  |
//! |---------------|----------------------------------------|
//! | `payload`     | Raw event bytes                        |
//! | `topic`       | Logical topic name                     |
//! | attribute     | One field per message attribute        |
//! | `orderingKey` | Present when the event carries one     |
//!
//! Redis assigns the entry id, which is returned as the publish receipt.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::domain::foundation::DomainError;
use crate::domain::outbox::OutboundMessage;
use crate::ports::{MessagePublisher, PublishReceipt};

const DEFAULT_STREAM_PREFIX: &str = "outbox:";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis Streams publisher.
///
/// The multiplexed connection is cheap to clone and shared by all workers.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: MultiplexedConnection,
    stream_prefix: String,
    max_len: Option<usize>,
    timeout: Duration,
}

impl RedisStreamPublisher {
    /// Create a new publisher with the default `outbox:` stream prefix.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
            max_len: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = prefix.into();
        self
    }

    /// Trim streams to roughly `max_len` entries on every append.
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    /// Bound on a single `XADD` round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn stream_key(&self, topic: &str) -> String {
        stream_key(&self.stream_prefix, topic)
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt, DomainError> {
        let key = self.stream_key(&message.topic);
        let cmd = xadd_command(&key, self.max_len, message);
        let mut conn = self.conn.clone();

        let entry_id: String = tokio::time::timeout(self.timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| {
                DomainError::broker(format!(
                    "XADD to {} timed out after {:?}",
                    key, self.timeout
                ))
            })?
            .map_err(|e: redis::RedisError| {
                DomainError::broker(format!("XADD to {} failed: {}", key, e))
            })?;

        Ok(PublishReceipt { message_id: entry_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helper functions
// ════════════════════════════════════════════════════════════════════════════

fn stream_key(prefix: &str, topic: &str) -> String {
    format!("{}{}", prefix, topic)
}

fn xadd_command(key: &str, max_len: Option<usize>, message: &OutboundMessage) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(key);
    if let Some(max_len) = max_len {
        cmd.arg("MAXLEN").arg("~").arg(max_len);
    }
    cmd.arg("*")
        .arg("payload")
        .arg(message.body.as_slice())
        .arg("topic")
        .arg(message.topic.as_str());
    for (name, value) in &message.attributes {
        cmd.arg(name.as_str()).arg(value.as_str());
    }
    if let Some(ordering_key) = &message.ordering_key {
        cmd.arg("orderingKey").arg(ordering_key.as_str());
    }
    cmd
}
