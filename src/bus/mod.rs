//! Typed publish/subscribe event bus.
//!
//! Producers publish typed payloads under a named *category*. Consumers join
//! a *reader group* identified by `(category, group, consumer_id)`; groups
//! compete for events (each physical event is processed by exactly one
//! consumer of the group at a time) and every group receives every event at
//! least once.
//!
//! This is a work queue, not an ordered log: there is **no** cross-event
//! ordering guarantee. Consumers must rely on data-level optimistic
//! concurrency for correctness, never on delivery order.
//!
//! A handler signals one of three outcomes:
//! - `Ok(())` — processed, ack.
//! - [`HandlerError::Discard`] — the event is no longer actionable; ack
//!   without retry (logged at debug).
//! - any other error — the delivery failed; the bus redelivers up to
//!   `max_retries` times, then logs and drops the event.

pub mod envelope;
pub mod memory;
pub mod registry;

#[cfg(test)]
mod tests;

pub use envelope::{Envelope, EventContext, EventId};
pub use memory::{MemoryBus, Subscription};
pub use registry::{HandlerRegistry, SubscribeOptions};

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by bus operations themselves (not by handlers).
#[derive(Debug, Error)]
pub enum BusError {
    /// The payload could not be serialized for publishing.
    #[error("failed to encode event payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// A reader group was subscribed twice for the same consumer.
    #[error("consumer {consumer_id:?} already subscribed to {category:?}/{group:?}")]
    AlreadySubscribed {
        category: String,
        group: String,
        consumer_id: String,
    },
}

/// Error type returned by event handlers.
///
/// `Discard` and `Decode` are terminal-success outcomes; everything else
/// drives the retry accounting.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event is no longer actionable (stale SHA, missing object, ...).
    /// Not counted as a failure; never retried.
    #[error("event discarded: {0}")]
    Discard(String),

    /// The payload did not decode into the registered type. Retrying cannot
    /// help, so this is treated like a discard (logged at warn).
    #[error("failed to decode event payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Processing failed; the delivery will be retried.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Shorthand for the discard outcome.
    pub fn discard(reason: impl Into<String>) -> Self {
        HandlerError::Discard(reason.into())
    }

    /// Shorthand for a retryable failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        HandlerError::Failed(err.to_string())
    }

    /// Returns true if this outcome must not be retried.
    pub fn is_discard(&self) -> bool {
        matches!(self, HandlerError::Discard(_) | HandlerError::Decode(_))
    }
}

/// Handler result alias used throughout the consumer services.
pub type HandlerResult = Result<(), HandlerError>;

/// Default per-event processing timeout.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);
/// Default idle wait before a consumer re-checks its queue.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default redelivery budget per event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default handler parallelism per subscription.
pub const DEFAULT_CONCURRENCY: usize = 2;
