//! In-process topic fan-out.
//!
//! Each (topic, subscriber) pair gets its own unbounded FIFO queue drained
//! by a dedicated worker task, so one slow or failing subscriber can never
//! stall the pipeline or its siblings.  Handler panics are caught in the
//! worker and logged; delivery to the remaining subscribers continues.

use fg_protocol::Event;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Topic names are a closed set; sinks subscribe by constant.
pub const TOPIC_CLI: &str = "cli";
pub const TOPIC_ALERTS: &str = "alerts";
pub const TOPIC_DASHBOARD: &str = "dashboard";

/// Opaque handle for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Event>,
    worker: JoinHandle<()>,
}

/// Topic-based event bus with per-subscriber isolation.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<&'static str, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to `topic`.  The same handler may be subscribed
    /// more than once; each subscription is delivered independently.
    pub fn subscribe<F, Fut>(&self, topic: &'static str, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let id = SubscriptionId::new();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Catch panics both from constructing the future and from
                // polling it, so the worker outlives a faulty handler.
                let fut = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                let panicked = match fut {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await.is_err(),
                    Err(_) => true,
                };
                if panicked {
                    warn!(topic, subscription = %id, "subscriber panicked; continuing");
                }
            }
        });

        self.topics
            .lock()
            .expect("event bus poisoned")
            .entry(topic)
            .or_default()
            .push(Subscriber { id, tx, worker });
        id
    }

    /// Detach a subscription.  Its queue is dropped; events already queued
    /// are still handled before the worker exits.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut topics = self.topics.lock().expect("event bus poisoned");
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Enqueue `event` for every subscriber of `topic`, in subscription
    /// order.  Never blocks and never fails: a closed queue just means the
    /// subscriber is gone.
    pub fn publish(&self, topic: &'static str, event: &Event) {
        let topics = self.topics.lock().expect("event bus poisoned");
        let Some(subscribers) = topics.get(topic) else {
            return;
        };
        for subscriber in subscribers {
            if subscriber.tx.send(event.clone()).is_err() {
                debug!(topic, subscription = %subscriber.id, "dropping event for closed subscriber");
            }
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &'static str) -> usize {
        self.topics
            .lock()
            .expect("event bus poisoned")
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Close all queues and wait up to `timeout` for workers to drain.
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        let workers: Vec<JoinHandle<()>> = {
            let mut topics = self.topics.lock().expect("event bus poisoned");
            topics
                .drain()
                .flat_map(|(_, subs)| subs)
                .map(|s| {
                    drop(s.tx);
                    s.worker
                })
                .collect()
        };
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("event bus drain timed out; forcing shutdown");
        }
    }
}
