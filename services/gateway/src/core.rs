//! Stream core: the single pipeline routine and the subscription protocol.
//!
//! Per raw frame: count, normalize, filter, dedup, publish.  Every failure
//! mode is absorbed here: a bad frame bumps a counter and the routine
//! moves on; nothing from a single frame can take the pipeline down.
//!
//! Subscription updates go through the manager's serialized critical
//! section, renegotiate the upstream connection, and commit only on
//! success; a failed update leaves the stored state untouched.

use fg_protocol::{Channel, ConnectionState, RawFrame, normalize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::dedup::{DedupCache, DedupResult};
use crate::filter::FilterChain;
use crate::stats::Stats;
use crate::subscription::{
    SubscriptionError, SubscriptionManager, SubscriptionState, normalize_channels, normalize_users,
};
use crate::upstream::UpstreamClient;

pub struct StreamCore {
    stats: Arc<Stats>,
    dedup: Arc<DedupCache>,
    filters: Arc<FilterChain>,
    bus: Arc<EventBus>,
    subscription: Arc<SubscriptionManager>,
    upstream: Arc<UpstreamClient>,
    dedup_ttl: Duration,
    /// Topics with at least one configured sink; disabled surfaces are
    /// never published to.
    topics: Vec<&'static str>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
}

impl StreamCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stats: Arc<Stats>,
        dedup: Arc<DedupCache>,
        filters: Arc<FilterChain>,
        bus: Arc<EventBus>,
        subscription: Arc<SubscriptionManager>,
        upstream: Arc<UpstreamClient>,
        dedup_ttl: Duration,
        topics: Vec<&'static str>,
    ) -> Arc<Self> {
        Arc::new(StreamCore {
            stats,
            dedup,
            filters,
            bus,
            subscription,
            upstream,
            dedup_ttl,
            topics,
            pipeline: Mutex::new(None),
        })
    }

    /// Start consuming raw frames.  Call after every sink has subscribed,
    /// so the first frame already fans out everywhere.
    pub fn spawn_pipeline(self: &Arc<Self>, mut frame_rx: mpsc::Receiver<RawFrame>) {
        let core = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                core.process_frame(frame);
            }
            debug!("pipeline drained; frame channel closed");
        });
        *self.pipeline.lock().expect("pipeline slot poisoned") = Some(task);
    }

    /// One pass of the event path.  Synchronous on purpose: publication
    /// only enqueues, so the pipeline never awaits sink I/O.
    pub fn process_frame(&self, frame: RawFrame) {
        self.stats.incr_total();

        let event = match normalize(&frame) {
            Ok(event) => event,
            Err(reason) => {
                self.stats.incr_filtered();
                debug!(event_type = %frame.event_type, %reason, "frame rejected");
                return;
            }
        };

        let snapshot = self.filters.snapshot();
        if !FilterChain::passes_snapshot(&snapshot, &event) {
            self.stats.incr_filtered();
            return;
        }

        let fingerprint = event.fingerprint();
        if self.dedup.check_and_remember(&fingerprint, self.dedup_ttl) == DedupResult::Duplicate {
            self.stats.incr_deduped();
            debug!(%fingerprint, "duplicate suppressed");
            return;
        }

        for topic in &self.topics {
            self.bus.publish(topic, &event);
        }
        self.stats.incr_delivered();
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.upstream.connection_state()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription.current()
    }

    /// Runtime resubscription.
    ///
    /// Validates and normalizes the request, takes the serialized update
    /// section (failing fast with `UpdateInProgress`), renegotiates the
    /// upstream connection, and commits atomically on success.  An empty
    /// channel set is valid and is the way into idle mode.
    pub async fn update_subscription(
        &self,
        channels: Vec<Channel>,
        users: Vec<String>,
    ) -> Result<SubscriptionState, SubscriptionError> {
        let channels = normalize_channels(channels);
        let users = normalize_users(users);

        let _gate = self.subscription.try_begin_update()?;
        self.upstream
            .update_selection(channels.clone(), users.clone())
            .await
            .map_err(|e| SubscriptionError::Upstream(e.to_string()))?;

        let state = self.subscription.commit_runtime(channels, users);
        info!(
            channels = ?state.channels,
            users = state.users.len(),
            mode = ?state.mode,
            "subscription updated"
        );
        Ok(state)
    }

    /// Orderly shutdown: cancel the upstream, let the pipeline drain the
    /// frames already in flight, then drain the sink queues bounded.
    pub async fn stop(&self, drain: Duration) {
        self.upstream.stop().await;
        let pipeline = self.pipeline.lock().expect("pipeline slot poisoned").take();
        if let Some(pipeline) = pipeline {
            if tokio::time::timeout(drain, pipeline).await.is_err() {
                debug!("pipeline drain timed out");
            }
        }
        self.bus.shutdown(drain).await;
    }
}
