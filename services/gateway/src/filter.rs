//! Interest filtering.
//!
//! An ordered chain of predicates; an event survives only if every
//! predicate passes.  The chain can be swapped atomically at runtime; the
//! pipeline takes a snapshot per event, so in-flight events always see a
//! consistent chain.

use fg_protocol::{Event, EventKind, FilterSnapshot};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::config::FilterSettings;

/// One interest predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Pass iff the attributed username is in the set (exact match on the
    /// normalized form).
    Users(BTreeSet<String>),
    /// Pass iff any keyword occurs case-insensitively in the effective
    /// text.  Events without text (follow/profile) fail: a keyword
    /// constraint expresses interest in content.
    Keywords(Vec<String>),
    /// Pass iff the event kind is in the set.
    Kinds(BTreeSet<EventKind>),
}

impl Predicate {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Predicate::Users(users) => users.contains(&event.user.username),
            Predicate::Keywords(keywords) => match event.effective_text() {
                Some(text) => {
                    let text = text.to_lowercase();
                    keywords.iter().any(|k| text.contains(k.as_str()))
                }
                None => false,
            },
            Predicate::Kinds(kinds) => kinds.contains(&event.kind),
        }
    }
}

/// Atomically-replaceable predicate chain.
#[derive(Debug, Default)]
pub struct FilterChain {
    inner: RwLock<Arc<Vec<Predicate>>>,
}

impl FilterChain {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        FilterChain {
            inner: RwLock::new(Arc::new(predicates)),
        }
    }

    /// Build the chain from config.  Empty axes add no predicate, so an
    /// unconstrained config yields an empty (pass-everything) chain.
    pub fn from_settings(settings: &FilterSettings) -> Self {
        let mut predicates = Vec::new();
        if !settings.users.is_empty() {
            predicates.push(Predicate::Users(
                settings
                    .users
                    .iter()
                    .map(|u| u.trim().to_lowercase())
                    .filter(|u| !u.is_empty())
                    .collect(),
            ));
        }
        if !settings.keywords.is_empty() {
            predicates.push(Predicate::Keywords(
                settings
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            ));
        }
        if !settings.kinds.is_empty() {
            predicates.push(Predicate::Kinds(settings.kinds.iter().copied().collect()));
        }
        Self::new(predicates)
    }

    /// The chain as observed right now.  Holders keep a consistent view
    /// even if `replace` runs concurrently.
    pub fn snapshot(&self) -> Arc<Vec<Predicate>> {
        self.inner.read().expect("filter chain poisoned").clone()
    }

    /// Swap the whole chain in one step.
    pub fn replace(&self, predicates: Vec<Predicate>) {
        *self.inner.write().expect("filter chain poisoned") = Arc::new(predicates);
    }

    /// Evaluate against the current snapshot.
    pub fn passes(&self, event: &Event) -> bool {
        Self::passes_snapshot(&self.snapshot(), event)
    }

    pub fn passes_snapshot(snapshot: &[Predicate], event: &Event) -> bool {
        snapshot.iter().all(|p| p.matches(event))
    }

    /// Current configuration, for dashboards.
    pub fn describe(&self) -> FilterSnapshot {
        let snapshot = self.snapshot();
        let mut out = FilterSnapshot::default();
        for predicate in snapshot.iter() {
            match predicate {
                Predicate::Users(users) => out.users = users.iter().cloned().collect(),
                Predicate::Keywords(keywords) => out.keywords = keywords.clone(),
                Predicate::Kinds(kinds) => out.kinds = kinds.iter().copied().collect(),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_protocol::{normalize, RawFrame};

    fn post_event(username: &str, text: &str) -> Event {
        let frame = RawFrame {
            event_type: "post_created".to_owned(),
            data: serde_json::json!({
                "user": { "username": username },
                "tweet": { "id": "t1", "bodyText": text, "author": { "handle": username } },
            }),
        };
        normalize(&frame).unwrap()
    }

    fn follow_event(username: &str) -> Event {
        let frame = RawFrame {
            event_type: "follow_created".to_owned(),
            data: serde_json::json!({
                "user": { "handle": username },
                "following": { "handle": "target" },
                "action": "follow",
            }),
        };
        normalize(&frame).unwrap()
    }

    #[test]
    fn empty_chain_passes_everything() {
        let chain = FilterChain::default();
        assert!(chain.passes(&post_event("anyone", "anything")));
        assert!(chain.passes(&follow_event("anyone")));
    }

    #[test]
    fn user_filter_passes_only_listed_users() {
        let chain = FilterChain::from_settings(&FilterSettings {
            users: vec!["Alice".to_owned()],
            ..Default::default()
        });
        assert!(chain.passes(&post_event("alice", "hi")));
        assert!(!chain.passes(&post_event("bob", "hi")));
    }

    #[test]
    fn keyword_filter_is_case_insensitive_substring() {
        let chain = FilterChain::from_settings(&FilterSettings {
            keywords: vec!["Bitcoin".to_owned()],
            ..Default::default()
        });
        assert!(chain.passes(&post_event("alice", "hello BITCOIN world")));
        assert!(!chain.passes(&post_event("alice", "hello ethereum")));
    }

    #[test]
    fn keyword_filter_fails_textless_events() {
        let chain = FilterChain::from_settings(&FilterSettings {
            keywords: vec!["bitcoin".to_owned()],
            ..Default::default()
        });
        assert!(!chain.passes(&follow_event("alice")));

        // Without a keyword constraint the same event passes.
        let open = FilterChain::default();
        assert!(open.passes(&follow_event("alice")));
    }

    #[test]
    fn kind_filter_gates_on_kind() {
        let chain = FilterChain::from_settings(&FilterSettings {
            kinds: vec![EventKind::FollowCreated],
            ..Default::default()
        });
        assert!(chain.passes(&follow_event("alice")));
        assert!(!chain.passes(&post_event("alice", "hi")));
    }

    #[test]
    fn predicates_combine_conjunctively() {
        let chain = FilterChain::from_settings(&FilterSettings {
            users: vec!["alice".to_owned()],
            keywords: vec!["bitcoin".to_owned()],
            kinds: vec![],
        });
        assert!(chain.passes(&post_event("alice", "bitcoin is up")));
        assert!(!chain.passes(&post_event("alice", "ethereum is up")));
        assert!(!chain.passes(&post_event("bob", "bitcoin is up")));
    }

    #[test]
    fn in_flight_snapshot_survives_replace() {
        let chain = FilterChain::default();
        let snapshot = chain.snapshot();

        chain.replace(vec![Predicate::Users(
            ["nobody".to_owned()].into_iter().collect(),
        )]);

        let event = post_event("alice", "hi");
        assert!(
            FilterChain::passes_snapshot(&snapshot, &event),
            "old snapshot still passes"
        );
        assert!(!chain.passes(&event), "new chain rejects");
    }

    #[test]
    fn describe_reports_active_axes() {
        let chain = FilterChain::from_settings(&FilterSettings {
            users: vec!["Bob".to_owned(), "alice".to_owned()],
            keywords: vec!["sol".to_owned()],
            kinds: vec![EventKind::PostCreated],
        });
        let snapshot = chain.describe();
        assert_eq!(snapshot.users, vec!["alice", "bob"]);
        assert_eq!(snapshot.keywords, vec!["sol"]);
        assert_eq!(snapshot.kinds, vec![EventKind::PostCreated]);
    }
}
