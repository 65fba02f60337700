//! TTL-bounded duplicate suppression.
//!
//! One entry per fingerprint, mapping to its expiry instant.  Expiry is
//! lazy: lookups treat an expired entry as absent, and a periodic sweep
//! keeps the map from accumulating dead keys on a quiet stream.
//!
//! Built on `tokio::time::Instant` so paused-clock tests can step the TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Sweep the whole map after this many calls, amortizing cleanup.
const SWEEP_EVERY: u64 = 256;

/// Outcome of a dedup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupResult {
    /// Never seen (or expired); the entry has been (re)armed.
    Fresh,
    /// A live entry exists; the event is a duplicate.
    Duplicate,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Instant>,
    calls_since_sweep: u64,
}

/// Fingerprint cache with per-entry TTL.
#[derive(Debug, Default)]
pub struct DedupCache {
    inner: Mutex<Inner>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe and arm in one step.
    ///
    /// Returns [`DedupResult::Duplicate`] when a non-expired entry exists.
    /// Otherwise inserts `(fp, now + ttl)` and returns `Fresh`.  Re-arming
    /// an expired key resets its timer.  A zero TTL expires immediately,
    /// which effectively disables suppression.
    pub fn check_and_remember(&self, fingerprint: &str, ttl: Duration) -> DedupResult {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("dedup cache poisoned");

        inner.calls_since_sweep += 1;
        if inner.calls_since_sweep >= SWEEP_EVERY {
            inner.calls_since_sweep = 0;
            inner.entries.retain(|_, expiry| *expiry > now);
        }

        if let Some(expiry) = inner.entries.get(fingerprint) {
            if *expiry > now {
                return DedupResult::Duplicate;
            }
        }
        inner.entries.insert(fingerprint.to_owned(), now + ttl);
        DedupResult::Fresh
    }

    /// True if a live (non-expired) entry exists for `fingerprint`.
    pub fn has(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .expect("dedup cache poisoned")
            .entries
            .get(fingerprint)
            .is_some_and(|expiry| *expiry > now)
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("dedup cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("dedup cache poisoned")
            .entries
            .clear();
    }
}
