//! Rate limit policies.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::error::{ClubgateError, Result};

/// A fixed-window rate limit: at most `limit` requests per `window`.
///
/// Both `limit` and `window` are always positive. The identifier is a
/// human-readable label used in diagnostics and baked into every key the
/// policy governs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitPolicy {
    limit: u64,
    window: Duration,
    identifier: Cow<'static, str>,
}

impl RateLimitPolicy {
    /// Create a policy for compiled-in use.
    ///
    /// Panics (at compile time when used in a `const`) if `limit` or
    /// `window_secs` is zero.
    pub const fn named(identifier: &'static str, limit: u64, window_secs: u64) -> Self {
        assert!(limit > 0, "rate limit policy needs a positive limit");
        assert!(window_secs > 0, "rate limit policy needs a positive window");
        Self {
            limit,
            window: Duration::from_secs(window_secs),
            identifier: Cow::Borrowed(identifier),
        }
    }

    /// Create a policy from runtime values, rejecting a zero limit or window.
    pub fn try_new(identifier: impl Into<String>, limit: u64, window_secs: u64) -> Result<Self> {
        let identifier = identifier.into();
        if limit == 0 {
            return Err(ClubgateError::Config(format!(
                "policy '{}' has a zero limit",
                identifier
            )));
        }
        if window_secs == 0 {
            return Err(ClubgateError::Config(format!(
                "policy '{}' has a zero window",
                identifier
            )));
        }

        Ok(Self {
            limit,
            window: Duration::from_secs(window_secs),
            identifier: Cow::Owned(identifier),
        })
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole seconds.
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} per {}s)",
            self.identifier,
            self.limit,
            self.window.as_secs()
        )
    }
}

/// Named policies for endpoints that opt into a dedicated limiter.
pub mod named {
    use super::RateLimitPolicy;

    /// Public contact form.
    pub const CONTACT_FORM: RateLimitPolicy = RateLimitPolicy::named("contact form", 5, 60);
    /// Public demo request form.
    pub const DEMO_REQUEST: RateLimitPolicy = RateLimitPolicy::named("demo request", 3, 600);
    /// Club invite code redemption; guards against code enumeration.
    pub const INVITE_REDEEM: RateLimitPolicy = RateLimitPolicy::named("invite redeem", 10, 300);
    /// Account registration.
    pub const SIGN_UP: RateLimitPolicy = RateLimitPolicy::named("sign up", 5, 900);
    /// Inbound webhook deliveries.
    pub const WEBHOOK: RateLimitPolicy = RateLimitPolicy::named("webhook", 60, 60);
    /// Ceiling applied when no route rule matches.
    pub const GLOBAL_DEFAULT: RateLimitPolicy = RateLimitPolicy::named("global", 300, 60);
}
