//! PostgreSQL adapters - Database implementations for the outbox ports.
//!
//! This module provides adapters for PostgreSQL-backed persistence:
//! - `PostgresOutboxStore` - Staging, leasing and finalizing `outbox_events` rows
//! - `PgChangeNotifier` - LISTEN/NOTIFY stream fed by the insert trigger

mod notify_listener;
mod outbox_store;

pub use notify_listener::PgChangeNotifier;
pub use outbox_store::PostgresOutboxStore;
