//! Redis adapters.
//!
//! - `RedisStreamPublisher` - Publishes outbound messages with `XADD`, one stream per topic

mod stream_publisher;

pub use stream_publisher::RedisStreamPublisher;
