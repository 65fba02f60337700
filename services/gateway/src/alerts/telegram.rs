//! Telegram bot delivery.
//!
//! Posts through the bot API: `sendPhoto` when the message carries at
//! least one image, `sendMessage` otherwise.  Captions use Telegram's
//! restricted HTML tag set and are capped at the API's 1024-character
//! caption limit.  Inline buttons link back to the post and the profile.

use serde_json::json;

use super::{AlertError, AlertMessage, execute, truncate_chars};
use crate::config::TelegramSettings;

const CAPTION_LIMIT: usize = 1024;

pub struct TelegramSink {
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(settings: &TelegramSettings) -> Self {
        TelegramSink {
            api_base: settings.api_base.trim_end_matches('/').to_owned(),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
        }
    }

    pub async fn deliver(
        &self,
        client: &reqwest::Client,
        msg: &AlertMessage,
    ) -> Result<(), AlertError> {
        let caption = build_caption(msg);
        let reply_markup = build_buttons(msg);

        let (method, body) = if let Some(photo) = msg.images.first() {
            (
                "sendPhoto",
                json!({
                    "chat_id": self.chat_id,
                    "photo": photo,
                    "caption": caption,
                    "parse_mode": "HTML",
                    "reply_markup": reply_markup,
                }),
            )
        } else {
            (
                "sendMessage",
                json!({
                    "chat_id": self.chat_id,
                    "text": caption,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": false,
                    "reply_markup": reply_markup,
                }),
            )
        };

        let url = format!("{}/bot{}/{}", self.api_base, self.bot_token, method);
        execute(client.post(url).json(&body)).await
    }
}

/// HTML caption: bold header, escaped body, timestamp footer.
fn build_caption(msg: &AlertMessage) -> String {
    let mut caption = format!(
        "<b>@{}</b> · {}\n\n{}",
        escape_html(&msg.username),
        msg.event_type,
        escape_html(&msg.text),
    );
    if !msg.videos.is_empty() {
        caption.push_str(&format!("\n\n🎬 Video(s): {}", msg.videos.len()));
    }
    caption.push_str(&format!("\n\n<i>{}</i>", msg.timestamp));
    truncate_chars(&caption, CAPTION_LIMIT)
}

fn build_buttons(msg: &AlertMessage) -> serde_json::Value {
    let mut row = Vec::new();
    if let Some(url) = &msg.post_url {
        row.push(json!({ "text": "View Post", "url": url }));
    }
    row.push(json!({
        "text": "View Profile",
        "url": format!("https://x.com/{}", msg.username),
    }));
    json!({ "inline_keyboard": [row] })
}

/// Telegram HTML mode accepts a restricted tag set; everything user-
/// supplied must have `&`, `<`, `>` escaped.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_protocol::EventKind;

    fn msg(text: &str, images: Vec<String>) -> AlertMessage {
        AlertMessage {
            event_type: EventKind::PostCreated,
            username: "alice".to_owned(),
            text: text.to_owned(),
            timestamp: "2026-03-01 15:04:05 UTC".to_owned(),
            images,
            videos: vec![],
            post_url: Some("https://x.com/alice/status/t1".to_owned()),
            avatar_url: None,
        }
    }

    #[test]
    fn caption_escapes_html_and_stays_under_limit() {
        let caption = build_caption(&msg("a <b>sneaky</b> & long post", vec![]));
        assert!(caption.contains("&lt;b&gt;sneaky&lt;/b&gt; &amp; long"));
        assert!(caption.starts_with("<b>@alice</b>"));

        let long = build_caption(&msg(&"y".repeat(3000), vec![]));
        assert!(long.chars().count() <= CAPTION_LIMIT);
        assert!(long.ends_with("..."));
    }

    #[test]
    fn buttons_include_post_link_only_when_present() {
        let with_post = build_buttons(&msg("hi", vec![]));
        let row = with_post["inline_keyboard"][0].as_array().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0]["text"], "View Post");
        assert_eq!(row[1]["text"], "View Profile");

        let mut no_post = msg("hi", vec![]);
        no_post.post_url = None;
        let buttons = build_buttons(&no_post);
        let row = buttons["inline_keyboard"][0].as_array().unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0]["text"], "View Profile");
    }
}
