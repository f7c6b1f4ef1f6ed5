//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the relay to external systems:
//! - `memory` - In-memory store, notifier and publisher for tests and local runs
//! - `postgres` - Outbox table access and LISTEN/NOTIFY
//! - `redis` - Redis Streams publisher

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{InMemoryChangeNotifier, InMemoryOutboxStore, InMemoryPublisher, StatusCounts};
pub use postgres::{PgChangeNotifier, PostgresOutboxStore};
pub use self::redis::RedisStreamPublisher;
