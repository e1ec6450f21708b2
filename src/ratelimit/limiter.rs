//! Admission decisions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::clock::Clock;
use super::key::RateLimitKey;
use super::policy::RateLimitPolicy;
use super::store::CounterStore;
use crate::error::Result;

/// The verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    /// The policy limit the request was counted against
    pub limit: u64,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
}

impl AdmissionResult {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = (self.reset_at - self.decided_at).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Turns counter increments into admission decisions.
///
/// The engine holds no counter state of its own; everything goes through the
/// store's atomic increment. Clones share the same store.
#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count a request against `key` and decide whether it may proceed.
    ///
    /// The limit is checked after incrementing: with a limit of `n`, the
    /// first `n` requests in a window are admitted and the `n + 1`-th is the
    /// first one denied. Denied requests still count.
    ///
    /// Store failures are returned unchanged; callers must treat them as an
    /// allow.
    pub async fn decide(&self, key: &RateLimitKey, policy: &RateLimitPolicy) -> Result<AdmissionResult> {
        trace!(key = %key, policy = %policy, "Checking admission");

        let counted = self.store.increment(key, policy.window()).await?;
        let window = chrono::Duration::from_std(policy.window())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let result = AdmissionResult {
            allowed: counted.count <= policy.limit(),
            remaining: policy.limit().saturating_sub(counted.count),
            reset_at: counted
                .window_started_at
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            limit: policy.limit(),
            decided_at: self.clock.now(),
        };

        if !result.allowed {
            debug!(
                key = %key,
                count = counted.count,
                limit = policy.limit(),
                "Rate limit exceeded"
            );
        }

        Ok(result)
    }
}
