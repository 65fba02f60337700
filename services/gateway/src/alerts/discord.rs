//! Discord incoming-webhook delivery.
//!
//! One rich embed per event: per-kind accent color from a fixed palette,
//! the first image as the embed's main image, a "View Post" field when the
//! post URL is known, and a video-count field when videos are attached.

use fg_protocol::EventKind;
use serde_json::json;

use super::{AlertError, AlertMessage, execute, truncate_chars};
use crate::config::DiscordSettings;

const DESCRIPTION_LIMIT: usize = 300;

/// Fixed accent palette, one color per event kind.
fn kind_color(kind: EventKind) -> u32 {
    match kind {
        EventKind::PostCreated => 0x1D_A1F2,
        EventKind::PostUpdated => 0xFF_AD1F,
        EventKind::FollowCreated => 0x17_BF63,
        EventKind::FollowUpdated => 0xF4_5D22,
        EventKind::UserUpdated => 0x79_4BC4,
        EventKind::ProfileUpdated => 0x92_66CC,
        EventKind::ProfilePinned => 0xE0_245E,
    }
}

pub struct DiscordSink {
    webhook_url: String,
}

impl DiscordSink {
    pub fn new(settings: &DiscordSettings) -> Self {
        DiscordSink {
            webhook_url: settings.webhook_url.clone(),
        }
    }

    pub async fn deliver(
        &self,
        client: &reqwest::Client,
        msg: &AlertMessage,
    ) -> Result<(), AlertError> {
        let body = json!({ "embeds": [build_embed(msg)] });
        execute(client.post(&self.webhook_url).json(&body)).await
    }
}

fn build_embed(msg: &AlertMessage) -> serde_json::Value {
    let mut embed = json!({
        "title": format!("@{} · {}", msg.username, msg.event_type),
        "description": truncate_chars(&msg.text, DESCRIPTION_LIMIT),
        "color": kind_color(msg.event_type),
        "footer": { "text": msg.timestamp },
    });

    if let Some(image) = msg.images.first() {
        embed["image"] = json!({ "url": image });
    }
    if let Some(avatar) = &msg.avatar_url {
        embed["thumbnail"] = json!({ "url": avatar });
    }

    let mut fields = Vec::new();
    if let Some(url) = &msg.post_url {
        fields.push(json!({
            "name": "View Post",
            "value": format!("[Open]({url})"),
            "inline": true,
        }));
    }
    if !msg.videos.is_empty() {
        fields.push(json!({
            "name": "Media",
            "value": format!("Video(s): {}", msg.videos.len()),
            "inline": true,
        }));
    }
    if !fields.is_empty() {
        embed["fields"] = json!(fields);
    }
    embed
}
