//! Fixed-window rate-limit counters.
//!
//! [`RateLimitStore`] is the seam a deployment swaps when counters have to be
//! shared between processes. [`InMemoryRateLimitStore`] keeps them in a
//! `DashMap`: the read-decide-write for a key runs while holding that key's
//! shard lock through the entry API, so two calls for the same key can never
//! interleave, and keys on other shards never wait on each other. Nothing in
//! the critical section awaits, so it stays atomic under both cooperative and
//! preemptive scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::clock::Clock;
use crate::metrics::RATE_LIMIT_KEYS;

// Rate limit entry - one fixed window per key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self { count: 1, window_reset_at: window_end(now, window) }
    }

    /// An expired entry must be replaced, never incremented.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }
}

/// Result of a single `check_and_increment` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Keyed fixed-window counters.
pub trait RateLimitStore: Send + Sync {
    /// Counts one request against `key` and reports whether it fits in the
    /// current window of at most `max_count` requests.
    fn check_and_increment(&self, key: &str, window: Duration, max_count: u32)
    -> RateLimitOutcome;

    /// Drops every entry whose window ended before `now`. Returns how many
    /// entries were removed.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of live buckets.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store. Re-created on restart, never torn down explicitly.
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
    clock: Arc<dyn Clock>,
    sweep_interval: TimeDelta,
    last_sweep_ms: AtomicI64,
}

impl InMemoryRateLimitStore {
    pub fn new(clock: Arc<dyn Clock>, sweep_interval: Duration) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval: TimeDelta::from_std(sweep_interval).unwrap_or(TimeDelta::MAX),
            last_sweep_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Current entry for `key`, if any. Expired entries are still returned
    /// until a sweep removes them.
    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    // Runs a sweep when the interval has passed. Only the caller that wins
    // the compare-and-swap on the last-sweep instant does the work.
    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        let now_ms = now.timestamp_millis();
        if now_ms.saturating_sub(last) < self.sweep_interval.num_milliseconds() {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.sweep(now);
            debug!(removed, remaining = self.entries.len(), "rate limit sweep finished");
        }
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        max_count: u32,
    ) -> RateLimitOutcome {
        let now = self.clock.now();

        if max_count == 0 {
            return RateLimitOutcome { allowed: false, remaining: 0, reset_at: window_end(now, window) };
        }

        // The shard guard lives until the end of this match.
        let (outcome, installed) = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let entry = RateLimitEntry::fresh(now, window);
                vacant.insert(entry);
                (first_in_window(entry, max_count), true)
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if current.is_expired(now) {
                    let entry = RateLimitEntry::fresh(now, window);
                    occupied.insert(entry);
                    (first_in_window(entry, max_count), false)
                } else if current.count >= max_count {
                    let outcome = RateLimitOutcome {
                        allowed: false,
                        remaining: 0,
                        reset_at: current.window_reset_at,
                    };
                    (outcome, false)
                } else {
                    let next = RateLimitEntry {
                        count: current.count + 1,
                        window_reset_at: current.window_reset_at,
                    };
                    occupied.insert(next);
                    let outcome = RateLimitOutcome {
                        allowed: true,
                        remaining: max_count - next.count,
                        reset_at: next.window_reset_at,
                    };
                    (outcome, false)
                }
            }
        };

        if installed {
            RATE_LIMIT_KEYS.set(self.entries.len() as f64);
        }
        self.maybe_sweep(now);

        outcome
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.window_reset_at >= now);
        let after = self.entries.len();
        RATE_LIMIT_KEYS.set(after as f64);
        before.saturating_sub(after)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn first_in_window(entry: RateLimitEntry, max_count: u32) -> RateLimitOutcome {
    RateLimitOutcome { allowed: true, remaining: max_count - 1, reset_at: entry.window_reset_at }
}

fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
