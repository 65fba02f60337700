//! Push-notification sinks.
//!
//! Every sink starts from the same [`AlertMessage`] derived from the
//! canonical event, owns its own sliding-window rate limiter, and delivers
//! over HTTP with a hard deadline.  A denied or failed send is dropped and
//! logged; nothing here may ever push back on the pipeline, and no sink
//! retries (the limiter plus drop-on-fail is the only backpressure).

pub mod discord;
pub mod telegram;
pub mod webhook;

use chrono::{DateTime, Utc};
use fg_protocol::{Event, EventKind, Payload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AlertSettings;
use crate::rate_limit::{Acquire, RateLimiter};

use discord::DiscordSink;
use telegram::TelegramSink;
use webhook::WebhookSink;

/// Hard deadline on every outbound alert call.
const SEND_DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// AlertMessage
// ---------------------------------------------------------------------------

/// Sink-agnostic projection of an event.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    pub event_type: EventKind,
    pub username: String,
    pub text: String,
    /// `YYYY-MM-DD HH:MM:SS UTC`.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl AlertMessage {
    pub fn from_event(event: &Event) -> Self {
        let text = match &event.payload {
            Payload::Post(_) => event.effective_text().unwrap_or_default().to_owned(),
            Payload::Follow(f) => {
                if f.action.is_new_follow() {
                    format!("followed @{}", f.following.handle)
                } else {
                    format!("follow updated: @{}", f.following.handle)
                }
            }
            Payload::Profile(p) => format!("profile {}", p.action),
        };
        let (images, videos) = match event.effective_media() {
            Some(media) => (media.images.clone(), media.videos.clone()),
            None => (Vec::new(), Vec::new()),
        };

        AlertMessage {
            event_type: event.kind,
            username: event.user.username.clone(),
            text,
            timestamp: display_timestamp(&event.timestamp),
            images,
            videos,
            post_url: event.post_url(),
            avatar_url: event.avatar_url().map(ToOwned::to_owned),
        }
    }
}

/// RFC-3339 to the fixed display form; falls back to "now" for timestamps
/// the upstream mangled.
fn display_timestamp(rfc3339: &str) -> String {
    let parsed = DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    parsed.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Truncate to at most `max` characters, appending an ellipsis when
/// anything was cut.  Operates on char boundaries.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("endpoint returned {0}")]
    Status(u16),
}

// ---------------------------------------------------------------------------
// Sink runners
// ---------------------------------------------------------------------------

enum SinkKind {
    Telegram(TelegramSink),
    Discord(DiscordSink),
    Webhook(WebhookSink),
}

/// One enabled sink with its limiter and HTTP client.
pub struct SinkRunner {
    name: &'static str,
    kind: SinkKind,
    limiter: RateLimiter,
    client: reqwest::Client,
}

impl SinkRunner {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rate-limit, deliver, log.  Infallible: every failure mode
    /// ends here.
    pub async fn handle(&self, event: Event) {
        let msg = AlertMessage::from_event(&event);
        match self.limiter.try_acquire() {
            Acquire::Denied {
                first_drop_in_window: true,
            } => {
                warn!(sink = self.name, "alert rate limit reached; dropping");
            }
            Acquire::Denied { .. } => {
                debug!(sink = self.name, "alert dropped by rate limit");
            }
            Acquire::Granted => {
                if let Err(e) = self.deliver(&msg).await {
                    warn!(sink = self.name, error = %e, "alert delivery failed");
                }
            }
        }
    }

    /// Send without rate limiting.  Exposed for formatter-level tests.
    pub async fn deliver(&self, msg: &AlertMessage) -> Result<(), AlertError> {
        match &self.kind {
            SinkKind::Telegram(sink) => sink.deliver(&self.client, msg).await,
            SinkKind::Discord(sink) => sink.deliver(&self.client, msg).await,
            SinkKind::Webhook(sink) => sink.deliver(&self.client, msg).await,
        }
    }
}

/// Build a runner per enabled sink.  Disabled sinks do not exist at
/// runtime; the enabled flag gates construction, not each send.
pub fn build_sinks(settings: &AlertSettings) -> Vec<Arc<SinkRunner>> {
    let window = Duration::from_secs(settings.rate_limit_window_secs);
    let client = reqwest::Client::builder()
        .timeout(SEND_DEADLINE)
        .build()
        .unwrap_or_default();

    let mut runners = Vec::new();
    if settings.telegram.enabled {
        runners.push(Arc::new(SinkRunner {
            name: "telegram",
            kind: SinkKind::Telegram(TelegramSink::new(&settings.telegram)),
            limiter: RateLimiter::new(settings.rate_limit_max, window),
            client: client.clone(),
        }));
    }
    if settings.discord.enabled {
        runners.push(Arc::new(SinkRunner {
            name: "discord",
            kind: SinkKind::Discord(DiscordSink::new(&settings.discord)),
            limiter: RateLimiter::new(settings.rate_limit_max, window),
            client: client.clone(),
        }));
    }
    if settings.webhook.enabled {
        runners.push(Arc::new(SinkRunner {
            name: "webhook",
            kind: SinkKind::Webhook(WebhookSink::new(&settings.webhook)),
            limiter: RateLimiter::new(settings.rate_limit_max, window),
            client,
        }));
    }
    runners
}

/// Shared helper for the three sinks: issue the request, map non-2xx to an
/// error, never retry.
pub(crate) async fn execute(request: reqwest::RequestBuilder) -> Result<(), AlertError> {
    let response = request
        .send()
        .await
        .map_err(|e| AlertError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AlertError::Status(status.as_u16()));
    }
    Ok(())
}
