//! Runtime subscription state.
//!
//! The stored state changes only through the manager's serialized update
//! protocol: at most one update may be in flight, a second attempt fails
//! with [`SubscriptionError::UpdateInProgress`], and a failed update leaves
//! the stored state bit-for-bit unchanged.

use chrono::{SecondsFormat, Utc};
use fg_protocol::Channel;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// `Idle` means zero channels: the upstream connection is intentionally
/// absent while every other sink keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    Active,
    Idle,
}

/// Who produced the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    Config,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub channels: Vec<Channel>,
    pub users: Vec<String>,
    pub mode: SubscriptionMode,
    pub source: SubscriptionSource,
    /// RFC-3339 UTC.
    pub updated_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("a subscription update is already in progress")]
    UpdateInProgress,
    #[error("invalid subscription: {0}")]
    Invalid(String),
    #[error("upstream rejected subscription update: {0}")]
    Upstream(String),
}

/// Trim, lowercase, deduplicate and sort a user list.
pub fn normalize_users<I, S>(users: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = users
        .into_iter()
        .map(|u| u.as_ref().trim().to_lowercase())
        .filter(|u| !u.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Deduplicate and sort channels; `all` absorbs its siblings.
pub fn normalize_channels(channels: impl IntoIterator<Item = Channel>) -> Vec<Channel> {
    let mut out: Vec<Channel> = channels.into_iter().collect();
    if out.contains(&Channel::All) {
        return vec![Channel::All];
    }
    out.sort();
    out.dedup();
    out
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Owner of the subscription state and its update critical section.
pub struct SubscriptionManager {
    state: Mutex<SubscriptionState>,
    update_gate: AsyncMutex<()>,
}

impl SubscriptionManager {
    /// Initial state from config.  Inputs are normalized here, so the
    /// stored form is canonical from the start.
    pub fn from_config(channels: Vec<Channel>, users: Vec<String>) -> Self {
        let channels = normalize_channels(channels);
        let users = normalize_users(users);
        let mode = if channels.is_empty() {
            SubscriptionMode::Idle
        } else {
            SubscriptionMode::Active
        };
        SubscriptionManager {
            state: Mutex::new(SubscriptionState {
                channels,
                users,
                mode,
                source: SubscriptionSource::Config,
                updated_at: now_rfc3339(),
            }),
            update_gate: AsyncMutex::new(()),
        }
    }

    pub fn current(&self) -> SubscriptionState {
        self.state.lock().expect("subscription state poisoned").clone()
    }

    /// Enter the serialized update section, or fail fast if another update
    /// holds it.  The returned guard must be kept alive for the duration
    /// of the upstream renegotiation.
    pub fn try_begin_update(&self) -> Result<AsyncMutexGuard<'_, ()>, SubscriptionError> {
        self.update_gate
            .try_lock()
            .map_err(|_| SubscriptionError::UpdateInProgress)
    }

    /// Commit an update that the upstream accepted.  Called with the guard
    /// from [`Self::try_begin_update`] still held.
    pub fn commit_runtime(&self, channels: Vec<Channel>, users: Vec<String>) -> SubscriptionState {
        let mode = if channels.is_empty() {
            SubscriptionMode::Idle
        } else {
            SubscriptionMode::Active
        };
        let mut state = self.state.lock().expect("subscription state poisoned");
        *state = SubscriptionState {
            channels,
            users,
            mode,
            source: SubscriptionSource::Runtime,
            updated_at: now_rfc3339(),
        };
        state.clone()
    }
}
