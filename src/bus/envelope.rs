//! Event envelopes and delivery metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier assigned to an event at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event as carried by the bus. Immutable once published; the
/// `delivery_count` is per reader group and maintained by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EventId,
    pub category: String,
    pub event_type: String,
    pub payload: serde_json::Value,

    /// Number of deliveries attempted for this group, including the current
    /// one. Starts at 1.
    pub delivery_count: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl Envelope {
    /// The delivery metadata, without the payload.
    pub fn context(&self) -> EventContext {
        EventContext {
            id: self.id.clone(),
            category: self.category.clone(),
            event_type: self.event_type.clone(),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Delivery metadata handed to typed handlers alongside the decoded payload.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub id: EventId,
    pub category: String,
    pub event_type: String,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl EventContext {
    /// Returns true if this is not the first delivery attempt.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
