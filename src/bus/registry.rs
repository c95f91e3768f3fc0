//! Typed handler registration.
//!
//! A [`HandlerRegistry`] is a dispatch table from event-type tag to a
//! type-erased handler. It is built once at service startup; registering a
//! handler for `P` wraps it in a closure that decodes the JSON payload into
//! `P` before invoking it, so consumer code only ever sees strong types.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::envelope::EventContext;
use super::{
    HandlerResult, DEFAULT_CONCURRENCY, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_PROCESSING_TIMEOUT,
};

type BoxedFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type BoxedHandler = Box<dyn Fn(EventContext, serde_json::Value) -> BoxedFuture + Send + Sync>;

/// Dispatch table from event type to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler for `event_type`.
    ///
    /// The payload is decoded into `P`; a decode failure is reported as
    /// [`super::HandlerError::Decode`] and treated as a discard by the bus.
    /// Registering the same event type twice replaces the earlier handler.
    pub fn register<P, F, Fut>(&mut self, event_type: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(EventContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |ctx, payload| {
            match serde_json::from_value::<P>(payload) {
                Ok(decoded) => Box::pin(handler(ctx, decoded)),
                Err(err) => Box::pin(async move { Err(err.into()) }),
            }
        });
        self.handlers.insert(event_type.into(), boxed);
    }

    /// Looks up the handler for an event type.
    pub(super) fn get(&self, event_type: &str) -> Option<&BoxedHandler> {
        self.handlers.get(event_type)
    }

    /// Event types with a registered handler.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Tuning for one subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// How many events this subscription processes in parallel.
    pub concurrency: usize,

    /// Redelivery budget per event; after this many failed deliveries the
    /// event is logged and dropped.
    pub max_retries: u32,

    /// Bus-enforced bound on a single handler invocation. A timeout counts
    /// as a failed delivery.
    pub processing_timeout: Duration,

    /// How long an idle consumer waits before re-checking its queue.
    pub idle_timeout: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl SubscribeOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
