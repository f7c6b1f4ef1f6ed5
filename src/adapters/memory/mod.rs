//! In-memory adapters.
//!
//! - `InMemoryOutboxStore` - Outbox table with atomic claims and insert notifications
//! - `InMemoryChangeNotifier` - Broadcast-backed notification stream
//! - `InMemoryPublisher` - Broker stand-in with scripted failures

mod notifier;
mod outbox_store;
mod publisher;

pub use notifier::InMemoryChangeNotifier;
pub use outbox_store::{InMemoryOutboxStore, StatusCounts};
pub use publisher::InMemoryPublisher;
