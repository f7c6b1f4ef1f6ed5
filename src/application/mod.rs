//! Application layer - Relay services.
//!
//! This layer orchestrates the outbox ports:
//! - `OutboxRelay` - One claim → publish → finalize step
//! - `RelayScheduler` - Dual-trigger (notification + poll) driver with a worker pool
//! - `LeaseSweeper` - Requeues rows whose lease outlived the timeout

mod lease_sweeper;
mod relay;
mod scheduler;

pub use lease_sweeper::LeaseSweeper;
pub use relay::{OutboxRelay, RelayOutcome};
pub use scheduler::{DrainStats, RelayScheduler, RelaySchedulerConfig};
