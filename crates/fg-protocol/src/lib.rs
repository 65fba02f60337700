// fg-protocol: Canonical event model and wire types for the feed gateway.
//
// Upstream frames arrive as newline-framed JSON with a top-level `event_type`
// discriminator; dashboard frames use a top-level `type` field.  The canonical
// `Event` is the only shape that crosses the pipeline after normalization.

use serde::{Deserialize, Serialize};

pub mod fingerprint;
pub mod normalize;

pub use fingerprint::fingerprint;
pub use normalize::{normalize, RejectReason};

// ---------------------------------------------------------------------------
// Event kinds and channels
// ---------------------------------------------------------------------------

/// The closed set of upstream occurrence kinds the gateway understands.
///
/// Frames with any other `event_type` are rejected by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostCreated,
    PostUpdated,
    FollowCreated,
    FollowUpdated,
    UserUpdated,
    ProfileUpdated,
    ProfilePinned,
}

impl EventKind {
    /// All known kinds, in declaration order.
    pub const ALL: [EventKind; 7] = [
        EventKind::PostCreated,
        EventKind::PostUpdated,
        EventKind::FollowCreated,
        EventKind::FollowUpdated,
        EventKind::UserUpdated,
        EventKind::ProfileUpdated,
        EventKind::ProfilePinned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PostCreated => "post_created",
            EventKind::PostUpdated => "post_updated",
            EventKind::FollowCreated => "follow_created",
            EventKind::FollowUpdated => "follow_updated",
            EventKind::UserUpdated => "user_updated",
            EventKind::ProfileUpdated => "profile_updated",
            EventKind::ProfilePinned => "profile_pinned",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// The upstream channel this kind is delivered on.
    pub fn channel(self) -> Channel {
        match self {
            EventKind::PostCreated | EventKind::PostUpdated => Channel::Tweets,
            EventKind::FollowCreated | EventKind::FollowUpdated => Channel::Following,
            EventKind::UserUpdated | EventKind::ProfileUpdated | EventKind::ProfilePinned => {
                Channel::Profile
            }
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream subscription channels.  `All` multiplexes the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    All,
    Tweets,
    Following,
    Profile,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::All => "all",
            Channel::Tweets => "tweets",
            Channel::Following => "following",
            Channel::Profile => "profile",
        }
    }

    pub fn parse(s: &str) -> Option<Channel> {
        match s {
            "all" => Some(Channel::All),
            "tweets" => Some(Channel::Tweets),
            "following" => Some(Channel::Following),
            "profile" => Some(Channel::Profile),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

/// The user an event is attributed to.  `username` is always present and
/// non-empty after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUser {
    pub username: String,
    #[serde(default, alias = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// The canonical in-process record of a single upstream occurrence.
///
/// Created by the normalizer, owned by the pipeline pass, and handed to sinks
/// by clone.  `kind`, `user.username` and `payload` are guaranteed present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// RFC-3339 UTC.
    pub timestamp: String,
    /// Identifies the affected object: tweet id, follow edge id, or user id.
    pub primary_id: String,
    pub user: EventUser,
    pub payload: Payload,
}

impl Event {
    /// Deduplication key over (kind, primary_id, payload).  Content-only:
    /// the event-level timestamp is not part of the key.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.kind, &self.primary_id, &self.payload)
    }

    /// The text shown for this event, if it has any.  For retweets with an
    /// empty outer body the subtweet supplies the text.
    pub fn effective_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Post(p) => Some(&p.tweet.effective().body_text),
            Payload::Follow(_) | Payload::Profile(_) => None,
        }
    }

    /// Media attached to the displayed content (subtweet-aware).
    pub fn effective_media(&self) -> Option<&Media> {
        match &self.payload {
            Payload::Post(p) => p.tweet.effective().media.as_ref(),
            _ => None,
        }
    }

    /// Author of the displayed content (subtweet-aware).
    pub fn effective_author(&self) -> Option<&Author> {
        match &self.payload {
            Payload::Post(p) => Some(&p.tweet.effective().author),
            _ => None,
        }
    }

    /// Public URL of the post, when the event is a post.  Always built from
    /// the outer tweet id, even when the displayed content is the subtweet.
    pub fn post_url(&self) -> Option<String> {
        match &self.payload {
            Payload::Post(p) => Some(format!(
                "https://x.com/{}/status/{}",
                p.tweet.author.handle, p.tweet.id
            )),
            _ => None,
        }
    }

    /// Public URL of the attributed user's profile.
    pub fn profile_url(&self) -> String {
        format!("https://x.com/{}", self.user.username)
    }

    /// Avatar of the displayed content's author, when known.
    pub fn avatar_url(&self) -> Option<&str> {
        self.effective_author()
            .and_then(|a| a.profile.as_ref())
            .and_then(|p| p.avatar.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Payload variants
// ---------------------------------------------------------------------------

/// Kind-tagged payload.  Sinks pattern-match on the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Post(PostPayload),
    Follow(FollowPayload),
    Profile(ProfilePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    pub tweet: Tweet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    #[serde(default, alias = "bodyText")]
    pub body_text: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    /// Present on retweets; carries the retweeted content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtweet: Option<Box<Tweet>>,
}

impl Tweet {
    /// The tweet whose content should be displayed: the subtweet when the
    /// outer body is empty and a subtweet exists (retweet), else `self`.
    pub fn effective(&self) -> &Tweet {
        match &self.subtweet {
            Some(sub) if self.body_text.trim().is_empty() => sub,
            _ => self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<AuthorProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowPayload {
    pub user: ProfileRef,
    pub following: ProfileRef,
    #[serde(default = "default_follow_action")]
    pub action: FollowAction,
}

fn default_follow_action() -> FollowAction {
    FollowAction::Updated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowAction {
    Created,
    Updated,
    Follow,
    FollowUpdate,
}

impl FollowAction {
    /// True for the actions that announce a new follow edge.
    pub fn is_new_follow(self) -> bool {
        matches!(self, FollowAction::Created | FollowAction::Follow)
    }

    pub fn parse(s: &str) -> Option<FollowAction> {
        match s {
            "created" => Some(FollowAction::Created),
            "updated" => Some(FollowAction::Updated),
            "follow" => Some(FollowAction::Follow),
            "follow_update" => Some(FollowAction::FollowUpdate),
            _ => None,
        }
    }
}

/// A user reference inside follow/profile payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRef {
    #[serde(default)]
    pub id: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<AuthorProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub user: ProfileRef,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub pinned: Vec<TweetSummary>,
}

fn default_action() -> String {
    "updated".to_owned()
}

/// A compact tweet reference carried in profile `pinned` lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetSummary {
    pub id: String,
    #[serde(default, alias = "bodyText")]
    pub body_text: String,
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Upstream wire frame
// ---------------------------------------------------------------------------

/// One newline-framed JSON document from the crawler stream.
///
/// `data` is kept as a raw value; the normalizer validates and converts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Upstream connection state signal, as surfaced to sinks and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Dashboard socket frames
// ---------------------------------------------------------------------------

/// Counters snapshot shipped to dashboards and `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub delivered: u64,
    pub deduped: u64,
    pub filtered: u64,
    pub rate_per_minute: u64,
}

/// Active filter configuration, as shown to dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub users: Vec<String>,
    pub keywords: Vec<String>,
    pub kinds: Vec<EventKind>,
}

/// Frames pushed over the dashboard WebSocket.
///
/// `State` is sent exactly once per connection, immediately after the
/// upgrade; `Event` and `Status` follow as the pipeline produces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardFrame {
    State {
        /// Recent events, newest first, at most the buffer capacity.
        events: Vec<Event>,
        /// Users on the current subscription.
        users: Vec<String>,
        connection: ConnectionState,
        stats: StatsSnapshot,
        filters: FilterSnapshot,
    },
    Event {
        event: Event,
    },
    Status {
        connection: ConnectionState,
    },
}
