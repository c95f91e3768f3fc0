//! Bus behavior tests: delivery, retry accounting, discard semantics,
//! competing consumers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

fn fast_options() -> SubscribeOptions {
    SubscribeOptions::default()
        .with_idle_timeout(Duration::from_millis(20))
        .with_processing_timeout(Duration::from_millis(500))
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true: {what}");
}

// ─── Typed delivery ───

#[tokio::test]
async fn delivers_typed_payload() {
    let bus = MemoryBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    let sink = Arc::clone(&seen);
    registry.register("ping", move |_ctx, payload: Ping| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().await.push(payload);
            Ok(())
        }
    });

    let sub = bus
        .subscribe("test", "group", "c1", registry, fast_options())
        .unwrap();

    bus.publish("test", "ping", &Ping { n: 7 }).unwrap();

    let seen_check = Arc::clone(&seen);
    eventually("payload delivered", move || {
        seen_check.try_lock().map(|v| v.len() == 1).unwrap_or(false)
    })
    .await;
    assert_eq!(seen.lock().await[0], Ping { n: 7 });

    sub.shutdown().await;
}

#[tokio::test]
async fn unregistered_event_types_are_dropped() {
    let bus = MemoryBus::new();
    let count = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&count);
    registry.register("ping", move |_ctx, _payload: Ping| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let sub = bus
        .subscribe("test", "group", "c1", registry, fast_options())
        .unwrap();

    bus.publish("test", "other", &Ping { n: 1 }).unwrap();
    bus.publish("test", "ping", &Ping { n: 2 }).unwrap();

    let check = Arc::clone(&count);
    eventually("ping handled", move || check.load(Ordering::SeqCst) == 1).await;

    // The unregistered event never arrives.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    sub.shutdown().await;
}

#[tokio::test]
async fn fans_out_to_every_group_once() {
    let bus = MemoryBus::new();
    let count_a = Arc::new(AtomicU32::new(0));
    let count_b = Arc::new(AtomicU32::new(0));

    let mut subs = Vec::new();
    for (group, count) in [("group-a", &count_a), ("group-b", &count_b)] {
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(count);
        registry.register("ping", move |_ctx, _payload: Ping| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        subs.push(
            bus.subscribe("test", group, "c1", registry, fast_options())
                .unwrap(),
        );
    }

    for n in 0..5 {
        bus.publish("test", "ping", &Ping { n }).unwrap();
    }

    let a = Arc::clone(&count_a);
    let b = Arc::clone(&count_b);
    eventually("both groups saw all events", move || {
        a.load(Ordering::SeqCst) == 5 && b.load(Ordering::SeqCst) == 5
    })
    .await;

    for sub in subs {
        sub.shutdown().await;
    }
}

#[tokio::test]
async fn competing_consumers_share_a_queue() {
    let bus = MemoryBus::new();
    let total = Arc::new(AtomicU32::new(0));

    let mut subs = Vec::new();
    for consumer in ["c1", "c2"] {
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&total);
        registry.register("ping", move |_ctx, _payload: Ping| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        subs.push(
            bus.subscribe("test", "group", consumer, registry, fast_options())
                .unwrap(),
        );
    }

    for n in 0..10 {
        bus.publish("test", "ping", &Ping { n }).unwrap();
    }

    let check = Arc::clone(&total);
    eventually("all events handled exactly once", move || {
        check.load(Ordering::SeqCst) == 10
    })
    .await;

    // No duplicate deliveries within the group.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(total.load(Ordering::SeqCst), 10);

    for sub in subs {
        sub.shutdown().await;
    }
}

#[tokio::test]
async fn double_subscribe_same_consumer_rejected() {
    let bus = MemoryBus::new();
    let sub = bus
        .subscribe(
            "test",
            "group",
            "c1",
            HandlerRegistry::new(),
            fast_options(),
        )
        .unwrap();

    let err = bus
        .subscribe(
            "test",
            "group",
            "c1",
            HandlerRegistry::new(),
            fast_options(),
        )
        .unwrap_err();
    assert!(matches!(err, BusError::AlreadySubscribed { .. }));

    sub.shutdown().await;
}

// ─── Retry and discard accounting ───

#[tokio::test]
async fn failed_delivery_is_retried_then_dropped() {
    let bus = MemoryBus::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&attempts);
    registry.register("ping", move |_ctx, _payload: Ping| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::failed("always fails"))
        }
    });

    let sub = bus
        .subscribe(
            "test",
            "group",
            "c1",
            registry,
            fast_options().with_max_retries(2),
        )
        .unwrap();

    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();

    // 1 initial delivery + 2 retries, then dropped.
    let check = Arc::clone(&attempts);
    eventually("retries exhausted", move || {
        check.load(Ordering::SeqCst) == 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    sub.shutdown().await;
}

#[tokio::test]
async fn discard_is_not_retried() {
    let bus = MemoryBus::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&attempts);
    registry.register("ping", move |_ctx, _payload: Ping| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::discard("object no longer exists"))
        }
    });

    let sub = bus
        .subscribe(
            "test",
            "group",
            "c1",
            registry,
            fast_options().with_max_retries(5),
        )
        .unwrap();

    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();

    let check = Arc::clone(&attempts);
    eventually("delivered once", move || check.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    sub.shutdown().await;
}

#[tokio::test]
async fn redelivery_count_is_visible_to_handler() {
    let bus = MemoryBus::new();
    let counts = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    let sink = Arc::clone(&counts);
    registry.register("ping", move |ctx, _payload: Ping| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(ctx.delivery_count);
            if ctx.is_redelivery() {
                Ok(())
            } else {
                Err(HandlerError::failed("fail first delivery"))
            }
        }
    });

    let sub = bus
        .subscribe("test", "group", "c1", registry, fast_options())
        .unwrap();

    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();

    let check = Arc::clone(&counts);
    eventually("second delivery succeeded", move || {
        check.lock().unwrap().len() == 2
    })
    .await;
    assert_eq!(*counts.lock().unwrap(), vec![1, 2]);

    sub.shutdown().await;
}

#[tokio::test]
async fn processing_timeout_counts_as_failure() {
    let bus = MemoryBus::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&attempts);
    registry.register("ping", move |_ctx, _payload: Ping| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    });

    let sub = bus
        .subscribe(
            "test",
            "group",
            "c1",
            registry,
            fast_options()
                .with_processing_timeout(Duration::from_millis(30))
                .with_max_retries(1),
        )
        .unwrap();

    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();

    let check = Arc::clone(&attempts);
    eventually("timed out and retried", move || {
        check.load(Ordering::SeqCst) == 2
    })
    .await;

    sub.shutdown().await;
}

#[tokio::test]
async fn undecodable_payload_is_discarded() {
    let bus = MemoryBus::new();
    let attempts = Arc::new(AtomicU32::new(0));

    #[derive(Debug, Serialize, Deserialize)]
    struct Strict {
        required_field: String,
    }

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&attempts);
    registry.register("ping", move |_ctx, _payload: Strict| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let sub = bus
        .subscribe("test", "group", "c1", registry, fast_options())
        .unwrap();

    // Payload shape does not match `Strict`; must not loop retrying.
    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 0);

    sub.shutdown().await;
}

// ─── Cancellation ───

#[tokio::test]
async fn shutdown_stops_consumers() {
    let bus = MemoryBus::new();
    let count = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let counter = Arc::clone(&count);
    registry.register("ping", move |_ctx, _payload: Ping| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let sub = bus
        .subscribe("test", "group", "c1", registry, fast_options())
        .unwrap();
    sub.shutdown().await;

    bus.publish("test", "ping", &Ping { n: 1 }).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
