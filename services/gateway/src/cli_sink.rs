//! Interactive terminal sink.
//!
//! Prints one line per delivered event and a periodic statistics block.
//! Output goes straight to stdout (this is the product surface, not a log
//! stream); operational logging stays on `tracing`.

use fg_protocol::{Event, Payload};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::alerts::truncate_chars;
use crate::bus::{EventBus, SubscriptionId, TOPIC_CLI};
use crate::stats::Stats;

const LINE_TEXT_LIMIT: usize = 100;

pub struct CliSink {
    stats: Arc<Stats>,
    /// Dedup observed outside the shared counters (exposed for the core).
    extra_deduped: AtomicU64,
    stats_interval: Duration,
    stopped: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl CliSink {
    pub fn new(stats: Arc<Stats>, stats_interval: Duration) -> Arc<Self> {
        Arc::new(CliSink {
            stats,
            extra_deduped: AtomicU64::new(0),
            stats_interval,
            stopped: AtomicBool::new(false),
            ticker: Mutex::new(None),
        })
    }

    /// Subscribe to the CLI topic and start the periodic stats block.
    pub fn start(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let ticker = {
            let sink = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sink.stats_interval);
                // The immediate first tick would print an all-zero block.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    sink.print_stats();
                }
            })
        };
        *self.ticker.lock().expect("cli ticker poisoned") = Some(ticker);

        let sink = Arc::clone(self);
        bus.subscribe(TOPIC_CLI, move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.print_event(&event);
            }
        })
    }

    /// Account for a dedup observed elsewhere in the pipeline.
    pub fn increment_deduped(&self) {
        self.extra_deduped.fetch_add(1, Ordering::Relaxed);
    }

    fn print_event(&self, event: &Event) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        println!("{}", format_line(event));
    }

    fn print_stats(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = self.stats.snapshot();
        let deduped = snapshot.deduped + self.extra_deduped.load(Ordering::Relaxed);
        let rate_per_sec = snapshot.rate_per_minute as f64 / 60.0;
        println!(
            "--- stats: total={} delivered={} deduped={} rate/s={:.2} ---",
            snapshot.total, snapshot.delivered, deduped, rate_per_sec
        );
    }

    /// Stop printing.  Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ticker) = self.ticker.lock().expect("cli ticker poisoned").take() {
            ticker.abort();
        }
    }
}

/// `[kind] @username: <summary>` with newlines stripped and post text
/// capped at 100 characters.
pub fn format_line(event: &Event) -> String {
    let text = match &event.payload {
        Payload::Post(_) => {
            let raw = event.effective_text().unwrap_or_default();
            truncate_chars(&strip_newlines(raw), LINE_TEXT_LIMIT)
        }
        Payload::Follow(f) => {
            if f.action.is_new_follow() {
                format!("followed @{}", f.following.handle)
            } else {
                format!("unfollowed @{}", f.following.handle)
            }
        }
        Payload::Profile(p) => {
            if p.pinned.is_empty() {
                format!("profile {}", p.action)
            } else {
                format!("{}: pinned tweets updated", p.action)
            }
        }
    };
    format!("[{}] @{}: {}", event.kind, event.user.username, text)
}

fn strip_newlines(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_protocol::{RawFrame, normalize};

    fn event(event_type: &str, data: serde_json::Value) -> Event {
        normalize(&RawFrame {
            event_type: event_type.to_owned(),
            data,
        })
        .unwrap()
    }

    #[test]
    fn post_line_shows_kind_user_and_text() {
        let e = event(
            "post_created",
            serde_json::json!({
                "user": { "username": "elonmusk" },
                "tweet": { "id": "t1", "bodyText": "Hello", "author": { "handle": "elonmusk" } },
            }),
        );
        assert_eq!(format_line(&e), "[post_created] @elonmusk: Hello");
    }

    #[test]
    fn post_line_strips_newlines_and_truncates() {
        let body = format!("line one\nline two\r\n{}", "x".repeat(200));
        let e = event(
            "post_created",
            serde_json::json!({
                "user": { "username": "alice" },
                "tweet": { "id": "t1", "bodyText": body, "author": { "handle": "alice" } },
            }),
        );
        let line = format_line(&e);
        assert!(!line.contains('\n'));
        assert!(line.contains("line one line two"));
        assert!(line.ends_with("..."));
        let shown = line.split(": ").nth(1).unwrap();
        assert!(shown.chars().count() <= LINE_TEXT_LIMIT);
    }

    #[test]
    fn follow_lines_distinguish_follow_and_update() {
        let follow = event(
            "follow_created",
            serde_json::json!({
                "user": { "handle": "alice" },
                "following": { "handle": "bob" },
                "action": "follow",
            }),
        );
        assert_eq!(format_line(&follow), "[follow_created] @alice: followed @bob");

        let update = event(
            "follow_updated",
            serde_json::json!({
                "user": { "handle": "alice" },
                "following": { "handle": "bob" },
                "action": "follow_update",
            }),
        );
        assert_eq!(
            format_line(&update),
            "[follow_updated] @alice: unfollowed @bob"
        );
    }

    #[test]
    fn profile_lines_mention_pinned_updates() {
        let plain = event(
            "profile_updated",
            serde_json::json!({ "user": { "id": "u1", "handle": "carol" } }),
        );
        assert_eq!(format_line(&plain), "[profile_updated] @carol: profile updated");

        let pinned = event(
            "profile_pinned",
            serde_json::json!({
                "user": { "id": "u1", "handle": "carol" },
                "pinned": [{ "id": "t9", "bodyText": "keeper" }],
            }),
        );
        assert_eq!(
            format_line(&pinned),
            "[profile_pinned] @carol: pinned: pinned tweets updated"
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sink = CliSink::new(Arc::new(Stats::new()), Duration::from_secs(60));
        let bus = EventBus::new();
        sink.start(&bus);
        sink.stop();
        sink.stop();
        sink.increment_deduped();
    }
}
