//! In-process, queue-backed bus implementation.
//!
//! Each `(category, group)` pair owns one queue. Publishing fans the event
//! out to every registered group of the category; consumers of a group
//! compete for entries of their shared queue. Failed deliveries are
//! re-enqueued at the back with an incremented delivery count, so redelivery
//! reorders events — which is within the bus contract (no FIFO guarantee).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::envelope::{Envelope, EventId};
use super::registry::{HandlerRegistry, SubscribeOptions};
use super::{BusError, HandlerError};

/// One reader group's work queue, shared by its competing consumers.
struct GroupQueue {
    pending: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl GroupQueue {
    fn new() -> Self {
        GroupQueue {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, envelope: Envelope) {
        self.pending
            .lock()
            .expect("group queue lock poisoned")
            .push_back(envelope);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Envelope> {
        self.pending
            .lock()
            .expect("group queue lock poisoned")
            .pop_front()
    }

    /// Pops the next entry, waiting up to `idle_timeout` for a notification
    /// if the queue is momentarily empty.
    async fn pop_or_wait(&self, idle_timeout: Duration) -> Option<Envelope> {
        if let Some(envelope) = self.pop() {
            return Some(envelope);
        }
        // A missed wakeup self-heals on the next idle cycle.
        let _ = tokio::time::timeout(idle_timeout, self.notify.notified()).await;
        self.pop()
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    /// Queues keyed by category, then reader group.
    groups: HashMap<String, HashMap<String, Arc<GroupQueue>>>,
    /// Guards against double subscription of the same consumer.
    consumers: HashSet<(String, String, String)>,
}

/// The in-process event bus. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a typed payload under `category`/`event_type`.
    ///
    /// At-least-once: the envelope is copied into every reader group
    /// registered for the category at publish time.
    pub fn publish<P: Serialize>(
        &self,
        category: &str,
        event_type: &str,
        payload: &P,
    ) -> Result<EventId, BusError> {
        let payload = serde_json::to_value(payload).map_err(BusError::Encode)?;

        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.next_id += 1;
        let id = EventId(format!("{category}-{}", inner.next_id));

        let envelope = Envelope {
            id: id.clone(),
            category: category.to_string(),
            event_type: event_type.to_string(),
            payload,
            delivery_count: 1,
            enqueued_at: Utc::now(),
        };

        let mut fanout = 0usize;
        if let Some(groups) = inner.groups.get(category) {
            for queue in groups.values() {
                queue.push(envelope.clone());
                fanout += 1;
            }
        }
        trace!(event_id = %id, category, event_type, fanout, "published event");

        Ok(id)
    }

    /// Joins a reader group and starts `options.concurrency` consumer tasks.
    ///
    /// The returned [`Subscription`] is the cancellation handle; dropping it
    /// does *not* stop the consumers — call [`Subscription::shutdown`].
    pub fn subscribe(
        &self,
        category: &str,
        group: &str,
        consumer_id: &str,
        registry: HandlerRegistry,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        let queue = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");

            let key = (
                category.to_string(),
                group.to_string(),
                consumer_id.to_string(),
            );
            if !inner.consumers.insert(key) {
                return Err(BusError::AlreadySubscribed {
                    category: category.to_string(),
                    group: group.to_string(),
                    consumer_id: consumer_id.to_string(),
                });
            }

            inner
                .groups
                .entry(category.to_string())
                .or_default()
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(GroupQueue::new()))
                .clone()
        };

        debug!(
            category,
            group,
            consumer_id,
            concurrency = options.concurrency,
            "subscribing reader group"
        );

        let registry = Arc::new(registry);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(options.concurrency);
        for slot in 0..options.concurrency.max(1) {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            let options = options.clone();
            let cancel = cancel.clone();
            let label = format!("{group}/{consumer_id}#{slot}");
            tasks.push(tokio::spawn(consumer_loop(
                queue, registry, options, cancel, label,
            )));
        }

        Ok(Subscription { cancel, tasks })
    }
}

async fn consumer_loop(
    queue: Arc<GroupQueue>,
    registry: Arc<HandlerRegistry>,
    options: SubscribeOptions,
    cancel: CancellationToken,
    label: String,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = queue.pop_or_wait(options.idle_timeout) => envelope,
        };
        let Some(envelope) = envelope else { continue };
        handle_delivery(&queue, &registry, &options, &label, envelope).await;
    }
    trace!(consumer = %label, "consumer loop stopped");
}

async fn handle_delivery(
    queue: &GroupQueue,
    registry: &HandlerRegistry,
    options: &SubscribeOptions,
    label: &str,
    envelope: Envelope,
) {
    let Some(handler) = registry.get(&envelope.event_type) else {
        trace!(
            consumer = label,
            event_type = %envelope.event_type,
            "no handler registered, dropping event"
        );
        return;
    };

    let outcome = tokio::time::timeout(
        options.processing_timeout,
        handler(envelope.context(), envelope.payload.clone()),
    )
    .await
    .unwrap_or_else(|_| Err(HandlerError::failed("processing timeout exceeded")));

    match outcome {
        Ok(()) => {
            trace!(consumer = label, event_id = %envelope.id, "event processed");
        }
        Err(err) if err.is_discard() => {
            debug!(
                consumer = label,
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                reason = %err,
                "event discarded"
            );
        }
        Err(err) => {
            if envelope.delivery_count <= options.max_retries {
                debug!(
                    consumer = label,
                    event_id = %envelope.id,
                    delivery_count = envelope.delivery_count,
                    error = %err,
                    "delivery failed, re-enqueueing"
                );
                let mut retry = envelope;
                retry.delivery_count += 1;
                queue.push(retry);
            } else {
                warn!(
                    consumer = label,
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    delivery_count = envelope.delivery_count,
                    error = %err,
                    "retries exhausted, dropping event"
                );
            }
        }
    }
}

/// Cancellation handle for one subscription's consumer tasks.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Token cancelled when the subscription shuts down. Services may hang
    /// auxiliary tasks (e.g. a cancellation-broadcast listener) off it.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ties an auxiliary task's lifetime to this subscription.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Signals the consumer tasks to stop after their current event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels and waits for all tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
