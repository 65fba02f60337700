//! Raw frame validation and conversion into the canonical [`Event`].
//!
//! The normalizer is deliberately tolerant: only `event_type`, a usable
//! username, and a structurally-sound payload are required.  Everything
//! else is defaulted (empty lists, `updated` actions, empty strings).
//! Rejections carry a reason and never abort the stream.
//!
//! The returned event owns all of its data; the caller may mutate or drop
//! the raw frame afterwards without affecting the event.

use crate::{
    Event, EventKind, EventUser, FollowAction, FollowPayload, Payload, PostPayload,
    ProfilePayload, ProfileRef, RawFrame, Tweet,
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Why a raw frame was not turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("unknown event type '{0}'")]
    UnknownKind(String),
    #[error("missing or empty username")]
    MissingUsername,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Convert one raw frame into a canonical event, or explain why not.
pub fn normalize(frame: &RawFrame) -> Result<Event, RejectReason> {
    let kind = EventKind::parse(&frame.event_type)
        .ok_or_else(|| RejectReason::UnknownKind(frame.event_type.clone()))?;

    let data = frame
        .data
        .as_object()
        .ok_or_else(|| RejectReason::InvalidPayload("data is not an object".to_owned()))?;

    let user = extract_user(kind, data)?;

    let (primary_id, payload) = match kind {
        EventKind::PostCreated | EventKind::PostUpdated => {
            normalize_post(data, &user.username)?
        }
        EventKind::FollowCreated | EventKind::FollowUpdated => normalize_follow(data)?,
        EventKind::UserUpdated | EventKind::ProfileUpdated | EventKind::ProfilePinned => {
            normalize_profile(kind, data)?
        }
    };

    if primary_id.is_empty() {
        return Err(RejectReason::InvalidPayload(
            "empty primary object id".to_owned(),
        ));
    }

    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    Ok(Event {
        kind,
        timestamp,
        primary_id,
        user,
        payload,
    })
}

// ---------------------------------------------------------------------------
// User attribution
// ---------------------------------------------------------------------------

/// Pull the attributed user out of `data.user`, falling back to the tweet
/// author's handle for post events where `data.user` is absent.
fn extract_user(
    kind: EventKind,
    data: &serde_json::Map<String, Value>,
) -> Result<EventUser, RejectReason> {
    let user_obj = data.get("user").and_then(Value::as_object);

    let username = user_obj
        .and_then(|u| {
            u.get("username")
                .or_else(|| u.get("handle"))
                .and_then(Value::as_str)
        })
        .or_else(|| {
            // Post frames from some crawler versions omit `user` and only
            // carry `tweet.author.handle`.
            if matches!(kind, EventKind::PostCreated | EventKind::PostUpdated) {
                data.get("tweet")
                    .and_then(|t| t.get("author"))
                    .and_then(|a| a.get("handle"))
                    .and_then(Value::as_str)
            } else {
                None
            }
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RejectReason::MissingUsername)?;

    let display_name = user_obj
        .and_then(|u| {
            u.get("display_name")
                .or_else(|| u.get("displayName"))
                .and_then(Value::as_str)
        })
        .map(ToOwned::to_owned);

    let user_id = user_obj
        .and_then(|u| {
            u.get("user_id")
                .or_else(|| u.get("userId"))
                .or_else(|| u.get("id"))
                .and_then(Value::as_str)
        })
        .map(ToOwned::to_owned);

    Ok(EventUser {
        username: username.to_owned(),
        display_name,
        user_id,
    })
}

// ---------------------------------------------------------------------------
// Per-family payload normalization
// ---------------------------------------------------------------------------

fn normalize_post(
    data: &serde_json::Map<String, Value>,
    username: &str,
) -> Result<(String, Payload), RejectReason> {
    let mut tweet_val = data
        .get("tweet")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| RejectReason::InvalidPayload("post without tweet object".to_owned()))?;

    // Default a missing author to the attributed user so the typed shape
    // always carries a handle.
    if let Some(obj) = tweet_val.as_object_mut() {
        if !obj.contains_key("author") {
            obj.insert(
                "author".to_owned(),
                serde_json::json!({ "handle": username }),
            );
        }
    }

    let tweet: Tweet = serde_json::from_value(tweet_val)
        .map_err(|e| RejectReason::InvalidPayload(format!("tweet: {e}")))?;

    Ok((tweet.id.clone(), Payload::Post(PostPayload { tweet })))
}

fn normalize_follow(
    data: &serde_json::Map<String, Value>,
) -> Result<(String, Payload), RejectReason> {
    let user = profile_ref(data.get("user"), "user")?;
    let following = profile_ref(data.get("following"), "following")?;

    let action = data
        .get("action")
        .and_then(Value::as_str)
        .map(|s| {
            FollowAction::parse(s)
                .ok_or_else(|| RejectReason::InvalidPayload(format!("unknown follow action '{s}'")))
        })
        .transpose()?
        .unwrap_or(FollowAction::Updated);

    // Follow edges have no id of their own upstream; derive a stable one.
    let primary_id = data
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("{}->{}", user.handle, following.handle));

    Ok((
        primary_id,
        Payload::Follow(FollowPayload {
            user,
            following,
            action,
        }),
    ))
}

fn normalize_profile(
    kind: EventKind,
    data: &serde_json::Map<String, Value>,
) -> Result<(String, Payload), RejectReason> {
    let user = profile_ref(data.get("user"), "user")?;

    let action = data
        .get("action")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            match kind {
                EventKind::ProfilePinned => "pinned",
                _ => "updated",
            }
            .to_owned()
        });

    let pinned = data
        .get("pinned")
        .cloned()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| RejectReason::InvalidPayload(format!("pinned: {e}")))
        })
        .transpose()?
        .unwrap_or_default();

    let primary_id = if user.id.is_empty() {
        user.handle.clone()
    } else {
        user.id.clone()
    };

    Ok((
        primary_id,
        Payload::Profile(ProfilePayload {
            user,
            action,
            pinned,
        }),
    ))
}

/// Deserialize a `{ id, handle, profile?, metrics? }` reference, accepting
/// `username` as a handle alias.
fn profile_ref(value: Option<&Value>, field: &str) -> Result<ProfileRef, RejectReason> {
    let obj = value
        .and_then(Value::as_object)
        .ok_or_else(|| RejectReason::InvalidPayload(format!("missing {field} object")))?;

    let handle = obj
        .get("handle")
        .or_else(|| obj.get("username"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RejectReason::InvalidPayload(format!("{field} without handle")))?
        .to_owned();

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let profile = obj
        .get("profile")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    let metrics = obj
        .get("metrics")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    Ok(ProfileRef {
        id,
        handle,
        profile,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event_type: &str, data: Value) -> RawFrame {
        RawFrame {
            event_type: event_type.to_owned(),
            data,
        }
    }

    #[test]
    fn post_frame_normalizes_with_defaults() {
        let raw = frame(
            "post_created",
            serde_json::json!({
                "user": { "username": "elonmusk" },
                "tweet": {
                    "id": "tweet123",
                    "bodyText": "Hello",
                    "author": { "handle": "elonmusk" },
                },
                "timestamp": "2026-03-01T12:00:00Z",
            }),
        );
        let event = normalize(&raw).unwrap();
        assert_eq!(event.kind, EventKind::PostCreated);
        assert_eq!(event.primary_id, "tweet123");
        assert_eq!(event.user.username, "elonmusk");
        assert_eq!(event.effective_text(), Some("Hello"));
        assert_eq!(event.timestamp, "2026-03-01T12:00:00Z");
        match &event.payload {
            Payload::Post(p) => {
                assert!(p.tweet.urls.is_empty());
                assert!(p.tweet.mentions.is_empty());
            }
            other => panic!("expected post payload, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let raw = frame("post_deleted", serde_json::json!({}));
        assert_eq!(
            normalize(&raw),
            Err(RejectReason::UnknownKind("post_deleted".to_owned()))
        );
    }

    #[test]
    fn empty_username_is_rejected() {
        let raw = frame(
            "follow_created",
            serde_json::json!({
                "user": { "handle": "  " },
                "following": { "handle": "bob" },
            }),
        );
        assert_eq!(normalize(&raw), Err(RejectReason::MissingUsername));
    }

    #[test]
    fn non_object_data_is_rejected() {
        let raw = frame("post_created", Value::String("nope".to_owned()));
        assert!(matches!(
            normalize(&raw),
            Err(RejectReason::InvalidPayload(_))
        ));
    }

    #[test]
    fn post_author_defaults_to_attributed_user() {
        let raw = frame(
            "post_created",
            serde_json::json!({
                "user": { "username": "alice" },
                "tweet": { "id": "t1", "bodyText": "hi" },
            }),
        );
        let event = normalize(&raw).unwrap();
        assert_eq!(event.effective_author().unwrap().handle, "alice");
    }

    #[test]
    fn follow_frame_derives_edge_id_and_action() {
        let raw = frame(
            "follow_created",
            serde_json::json!({
                "user": { "id": "u1", "handle": "alice" },
                "following": { "id": "u2", "handle": "bob" },
                "action": "follow",
            }),
        );
        let event = normalize(&raw).unwrap();
        assert_eq!(event.primary_id, "alice->bob");
        match &event.payload {
            Payload::Follow(f) => {
                assert_eq!(f.action, FollowAction::Follow);
                assert_eq!(f.following.handle, "bob");
            }
            other => panic!("expected follow payload, got {other:?}"),
        }
    }

    #[test]
    fn follow_action_defaults_to_updated() {
        let raw = frame(
            "follow_updated",
            serde_json::json!({
                "user": { "handle": "alice" },
                "following": { "handle": "bob" },
            }),
        );
        let event = normalize(&raw).unwrap();
        match &event.payload {
            Payload::Follow(f) => assert_eq!(f.action, FollowAction::Updated),
            other => panic!("expected follow payload, got {other:?}"),
        }
    }

    #[test]
    fn profile_frame_defaults_action_and_pinned() {
        let raw = frame(
            "profile_updated",
            serde_json::json!({
                "user": { "id": "u9", "handle": "carol" },
            }),
        );
        let event = normalize(&raw).unwrap();
        assert_eq!(event.primary_id, "u9");
        match &event.payload {
            Payload::Profile(p) => {
                assert_eq!(p.action, "updated");
                assert!(p.pinned.is_empty());
            }
            other => panic!("expected profile payload, got {other:?}"),
        }
    }

    #[test]
    fn profile_pinned_carries_summaries() {
        let raw = frame(
            "profile_pinned",
            serde_json::json!({
                "user": { "id": "u9", "handle": "carol" },
                "pinned": [
                    { "id": "t1", "bodyText": "pinned one" },
                    { "id": "t2" },
                ],
            }),
        );
        let event = normalize(&raw).unwrap();
        match &event.payload {
            Payload::Profile(p) => {
                assert_eq!(p.action, "pinned");
                assert_eq!(p.pinned.len(), 2);
                assert_eq!(p.pinned[0].body_text, "pinned one");
            }
            other => panic!("expected profile payload, got {other:?}"),
        }
    }

    #[test]
    fn mutating_raw_after_normalize_leaves_event_intact() {
        let mut raw = frame(
            "post_created",
            serde_json::json!({
                "user": { "username": "alice" },
                "tweet": { "id": "t1", "bodyText": "before", "author": { "handle": "alice" } },
            }),
        );
        let event = normalize(&raw).unwrap();
        raw.data["tweet"]["bodyText"] = Value::String("after".to_owned());
        assert_eq!(event.effective_text(), Some("before"));

        // And normalizing the mutated copy equals normalizing fresh input.
        let again = normalize(&raw).unwrap();
        assert_eq!(again.effective_text(), Some("after"));
    }

    #[test]
    fn resent_frame_with_new_timestamp_keeps_fingerprint() {
        let body = serde_json::json!({
            "user": { "username": "alice" },
            "tweet": { "id": "t1", "bodyText": "same", "author": { "handle": "alice" } },
        });
        let mut first = body.clone();
        first["timestamp"] = Value::String("2026-03-01T12:00:00Z".to_owned());
        let mut second = body;
        second["timestamp"] = Value::String("2026-03-01T12:00:05Z".to_owned());

        let a = normalize(&frame("post_created", first)).unwrap();
        let b = normalize(&frame("post_created", second)).unwrap();
        assert_ne!(a.timestamp, b.timestamp);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
