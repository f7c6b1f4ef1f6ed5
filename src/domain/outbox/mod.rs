//! Outbox module - Staged events and their delivery lifecycle.
//!
//! ```text
//!   pending ──lease──▶ publishing ──ok──▶ published
//!      ▲                   │
//!      └──retry (backoff)──┤
//!                          └──attempts >= max──▶ failed
//! ```

mod event;
mod message;
mod retry;
mod status;

pub use event::{NewOutboxEvent, OutboxEvent, ShardKey, TenantScope};
pub use message::{
    MessageIdentity, OutboundMessage, ATTR_CORRELATION_ID, ATTR_DISTRICT_ID, ATTR_EVENT_ID,
    ATTR_PRODUCER, ATTR_SCHOOL_ID, ATTR_SHARD_KEY, ATTR_VERSION,
};
pub use retry::{FailureOutcome, RetryPolicy};
pub use status::OutboxStatus;
