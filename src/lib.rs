//! Outbox Relay - Transactional outbox delivery
//!
//! Producers stage domain events in the `outbox_events` table inside their own
//! business transaction. This crate moves those rows to the message broker with
//! at-least-once delivery, per-shard ordering, exponential backoff and a
//! terminal `failed` state, while any number of relay instances run side by side.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
