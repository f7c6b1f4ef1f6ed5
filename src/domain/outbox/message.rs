//! Broker-facing message built from a claimed outbox row.

use std::collections::BTreeMap;

use super::OutboxEvent;

pub const ATTR_EVENT_ID: &str = "eventId";
pub const ATTR_CORRELATION_ID: &str = "correlationId";
pub const ATTR_DISTRICT_ID: &str = "districtId";
pub const ATTR_SCHOOL_ID: &str = "schoolId";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_PRODUCER: &str = "producer";
pub const ATTR_SHARD_KEY: &str = "shardKey";

/// Identity stamped on every outbound message by this relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIdentity {
    pub producer: String,
    pub schema_version: String,
}

impl MessageIdentity {
    pub fn new(producer: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            schema_version: schema_version.into(),
        }
    }
}

impl Default for MessageIdentity {
    fn default() -> Self {
        Self::new("outbox-relay", "1")
    }
}

/// A message ready for the broker.
///
/// Ordering is scoped per key: messages sharing `ordering_key` are delivered
/// in publish order, unrelated keys carry no ordering guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub body: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub ordering_key: Option<String>,
}

impl OutboundMessage {
    pub fn from_event(event: &OutboxEvent, identity: &MessageIdentity) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_EVENT_ID.to_string(), event.event_id.to_string());
        attributes.insert(ATTR_VERSION.to_string(), identity.schema_version.clone());
        attributes.insert(ATTR_PRODUCER.to_string(), identity.producer.clone());

        let optional = [
            (ATTR_CORRELATION_ID, event.correlation_id.as_deref()),
            (ATTR_DISTRICT_ID, event.tenant.district_id.as_deref()),
            (ATTR_SCHOOL_ID, event.tenant.school_id.as_deref()),
            (ATTR_SHARD_KEY, event.shard_key.as_ref().map(|k| k.as_str())),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                attributes.insert(name.to_string(), value.to_string());
            }
        }

        Self {
            topic: event.topic.clone(),
            body: event.payload.clone(),
            attributes,
            ordering_key: event.effective_ordering_key().map(str::to_string),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn event_id(&self) -> Option<&str> {
        self.attribute(ATTR_EVENT_ID)
    }
}
