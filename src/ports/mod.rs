//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the relay and the outside world. Adapters implement these ports.
//!
//! - `OutboxWriter` - Producer contract: stage events inside a business transaction
//! - `OutboxStore` - Lease and finalize rows (the relay side of the table)
//! - `MessagePublisher` - Deliver outbound messages to the broker
//! - `ChangeNotifier` - Optional insert notifications for low-latency pickup
//! - `DeadLetterReader` - Harvest terminally failed rows

mod change_notifier;
mod dead_letter_reader;
mod message_publisher;
mod outbox_store;
mod outbox_writer;

pub use change_notifier::{ChangeNotification, ChangeNotifier, NotificationStream};
pub use dead_letter_reader::DeadLetterReader;
pub use message_publisher::{MessagePublisher, PublishReceipt};
pub use outbox_store::OutboxStore;
pub use outbox_writer::OutboxWriter;
