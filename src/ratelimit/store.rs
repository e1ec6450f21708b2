//! Fixed-window counter storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::Clock;
use super::key::RateLimitKey;
use crate::error::Result;

/// Outcome of one increment: the count after incrementing and when the
/// current window began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub window_started_at: DateTime<Utc>,
}

/// Storage backend for admission counters.
///
/// Implementations must make `increment` atomic per key: concurrent calls
/// for the same key may be serialized in any order but none may be lost.
/// The in-memory store is the only implementation shipped; a networked
/// store can be substituted without touching call sites.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request against `key` in a window of length `window`.
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount>;
}

/// A counter owned by the in-memory store.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    window_started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn open(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            window_started_at: now,
            expires_at: now
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Single-process counter store.
///
/// Counters live in a sharded map; the entry API holds the shard lock for
/// the whole read-modify-write, which is what makes `increment` atomic.
/// Expired counters are reset on their next touch and removed by
/// [`sweep_expired`](Self::sweep_expired).
pub struct InMemoryCounterStore {
    counters: DashMap<RateLimitKey, CounterEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Increment without going through the async trait.
    pub fn increment_now(&self, key: &RateLimitKey, window: Duration) -> WindowCount {
        let now = self.clock.now();
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500));

        let entry = self
            .counters
            .entry(key.clone())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    *entry = CounterEntry::open(now, window);
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            })
            .or_insert_with(|| CounterEntry::open(now, window));

        trace!(
            key = %key,
            count = entry.count,
            window_started_at = %entry.window_started_at,
            "Incremented counter"
        );

        WindowCount {
            count: entry.count,
            window_started_at: entry.window_started_at,
        }
    }

    /// Current count for a key, or `None` if it has no live window.
    pub fn current_count(&self, key: &RateLimitKey) -> Option<u64> {
        let now = self.clock.now();
        self.counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
    }

    /// Remove every counter whose window has elapsed. Returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());

        if removed > 0 {
            debug!(removed, remaining = self.counters.len(), "Swept expired counters");
        }
        removed
    }

    /// Number of counters currently held, live or expired.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` on the
    /// current tokio runtime until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_expired();
            }
        })
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount> {
        Ok(self.increment_now(key, window))
    }
}
