//! Sliding-window rate limiting for alert sinks.
//!
//! Keeps the timestamps of accepted sends inside the current window; old
//! entries are evicted lazily on each probe.  Failed HTTP calls still count
//! against the window; the limiter bounds attempts, not successes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Window {
    accepted: VecDeque<Instant>,
    /// Set when a drop has been warned about since the last accept, so a
    /// burst of drops produces one warning per window instead of spam.
    warned_at: Option<Instant>,
}

/// Thread-safe sliding-window counter.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    state: Mutex<Window>,
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The send may proceed; it has been recorded.
    Granted,
    /// Over budget.  `first_drop_in_window` is true exactly once per
    /// window of consecutive denials, for warn-once logging.
    Denied { first_drop_in_window: bool },
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        RateLimiter {
            max,
            window,
            state: Mutex::new(Window {
                accepted: VecDeque::new(),
                warned_at: None,
            }),
        }
    }

    /// True iff another send would currently be admitted.  Does not record.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter poisoned");
        Self::evict(&mut state, now, self.window);
        (state.accepted.len() as u32) < self.max
    }

    /// Record an accepted send without checking.  Exposed for callers that
    /// separate the decision from the action.
    pub fn record(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter poisoned");
        Self::evict(&mut state, now, self.window);
        state.accepted.push_back(now);
        state.warned_at = None;
    }

    /// Combined probe-and-record under one lock.
    pub fn try_acquire(&self) -> Acquire {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter poisoned");
        Self::evict(&mut state, now, self.window);

        if (state.accepted.len() as u32) < self.max {
            state.accepted.push_back(now);
            state.warned_at = None;
            Acquire::Granted
        } else {
            let first = match state.warned_at {
                Some(at) if now.duration_since(at) < self.window => false,
                _ => {
                    state.warned_at = Some(now);
                    true
                }
            };
            Acquire::Denied {
                first_drop_in_window: first,
            }
        }
    }

    fn evict(state: &mut Window, now: Instant, window: Duration) {
        while let Some(front) = state.accepted.front() {
            if now.duration_since(*front) >= window {
                state.accepted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_then_denies() {
        let limiter = RateLimiter::new(2, WINDOW);
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
        assert!(matches!(limiter.try_acquire(), Acquire::Denied { .. }));
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_readmits() {
        let limiter = RateLimiter::new(1, WINDOW);
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
        assert!(matches!(limiter.try_acquire(), Acquire::Denied { .. }));

        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn warns_once_per_window_of_drops() {
        let limiter = RateLimiter::new(1, WINDOW);
        limiter.record();

        assert_eq!(
            limiter.try_acquire(),
            Acquire::Denied {
                first_drop_in_window: true
            }
        );
        assert_eq!(
            limiter.try_acquire(),
            Acquire::Denied {
                first_drop_in_window: false
            }
        );

        tokio::time::advance(WINDOW).await;
        // New window, fresh grant; the next burst warns again.
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
        assert_eq!(
            limiter.try_acquire(),
            Acquire::Denied {
                first_drop_in_window: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn partial_expiry_frees_exactly_the_aged_slots() {
        let limiter = RateLimiter::new(2, WINDOW);
        limiter.record();
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.record();
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_secs(30)).await;
        // First record is 60s old and evicted; second is 30s old.
        assert!(limiter.allow());
        assert_eq!(limiter.try_acquire(), Acquire::Granted);
        assert!(!limiter.allow());
    }
}
