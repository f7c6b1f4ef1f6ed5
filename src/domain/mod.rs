//! Domain layer containing the relay's types and pure decisions.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `outbox` - Outbox rows, delivery status, retry policy, outbound messages

pub mod foundation;
pub mod outbox;
