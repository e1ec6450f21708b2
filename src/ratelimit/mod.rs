//! Rate limiting logic and state management.

pub mod clock;
mod key;
mod limiter;
pub mod policy;
mod rules;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{derive_key, ClientIdentity, KeyNamespace, RateLimitKey, RouteIdentity, UNKNOWN_CLIENT};
pub use limiter::{AdmissionEngine, AdmissionResult};
pub use policy::RateLimitPolicy;
pub use rules::{
    PolicyRegistry, ResolvedPolicy, RouteRule, RoutePattern, RouteRuleConfig, RuleLimit,
    RulesDocument, DEFAULT_PATTERN,
};
pub use store::{CounterStore, InMemoryCounterStore, WindowCount};
