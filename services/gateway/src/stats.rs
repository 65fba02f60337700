//! Pipeline statistics.
//!
//! Counters are monotonic and lock-free; the per-minute rate comes from a
//! 60-slot ring of per-second delivery counts, resampled on read.  Uses
//! `tokio::time::Instant` so paused-clock tests can drive the window.

use fg_protocol::StatsSnapshot;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

const RING_SLOTS: usize = 60;

#[derive(Debug)]
struct RateRing {
    slots: [u64; RING_SLOTS],
    /// Seconds since `started` when a slot was last written.
    last_tick: u64,
    started: Instant,
}

impl RateRing {
    fn new() -> Self {
        RateRing {
            slots: [0; RING_SLOTS],
            last_tick: 0,
            started: Instant::now(),
        }
    }

    fn tick(&mut self) -> u64 {
        let now_tick = self.started.elapsed().as_secs();
        if now_tick > self.last_tick {
            // Zero every slot that belongs to a second we skipped over.
            let gap = (now_tick - self.last_tick).min(RING_SLOTS as u64);
            for i in 1..=gap {
                let idx = ((self.last_tick + i) as usize) % RING_SLOTS;
                self.slots[idx] = 0;
            }
            self.last_tick = now_tick;
        }
        now_tick
    }

    fn record(&mut self) {
        let tick = self.tick();
        self.slots[(tick as usize) % RING_SLOTS] += 1;
    }

    fn per_minute(&mut self) -> u64 {
        self.tick();
        self.slots.iter().sum()
    }
}

/// Shared pipeline counters.  Cloning the handle is cheap; all clones
/// observe the same values.
#[derive(Debug)]
pub struct Stats {
    total: AtomicU64,
    delivered: AtomicU64,
    deduped: AtomicU64,
    filtered: AtomicU64,
    ring: Mutex<RateRing>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            total: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            deduped: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            ring: Mutex::new(RateRing::new()),
        }
    }

    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.ring.lock().expect("stats ring poisoned").record();
    }

    pub fn incr_deduped(&self) {
        self.deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn deduped(&self) -> u64 {
        self.deduped.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Deliveries observed over the trailing 60 seconds.
    pub fn rate_per_minute(&self) -> u64 {
        self.ring.lock().expect("stats ring poisoned").per_minute()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            delivered: self.delivered(),
            deduped: self.deduped(),
            filtered: self.filtered(),
            rate_per_minute: self.rate_per_minute(),
        }
    }
}
