//! Route rules and policy resolution.
//!
//! The registry maps an HTTP method and request path onto the policy that
//! governs it. Rules are matched by route pattern, and the most specific
//! match wins:
//!
//! - an exact pattern (literal segments only) beats a parameterised one
//! - a parameterised pattern (`/api/clubs/:id`) beats a prefix wildcard
//!   (`/api/*`)
//! - among the same kind, more literal segments win, then a rule bound to a
//!   method beats an any-method rule, then the earlier rule
//!
//! A path that matches nothing resolves to the default policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::policy::{named, RateLimitPolicy};
use crate::error::Result;

/// Pattern reported for requests that fell through to the default policy.
pub const DEFAULT_PATTERN: &str = "*";

/// A rules document as written in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    /// Policy applied when no rule matches
    #[serde(default)]
    pub default: Option<RuleLimit>,
    /// Route rules
    #[serde(default)]
    pub rules: Vec<RouteRuleConfig>,
}

/// A limit without a route, used for the default entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleLimit {
    pub limit: u64,
    pub window_secs: u64,
    pub identifier: String,
}

/// One route rule as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRuleConfig {
    /// HTTP method to match; absent means any method
    #[serde(default)]
    pub method: Option<String>,
    /// Route pattern, e.g. `/api/clubs/:id/members` or `/api/webhooks/*`
    pub pattern: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Label used in logs and keys; defaults to the pattern
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
    prefix: bool,
}

/// Specificity ranking, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Specificity {
    kind: u8,
    literals: usize,
    method_bound: bool,
}

impl RoutePattern {
    /// Parse a pattern. Returns `None` for patterns that do not start with
    /// `/`, contain a wildcard anywhere but the end, or have an empty
    /// parameter name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let rest = raw.strip_prefix('/')?;

        let (body, prefix) = match rest.strip_suffix('*') {
            Some(body) => (body.strip_suffix('/').unwrap_or(body), true),
            None => (rest.strip_suffix('/').unwrap_or(rest), false),
        };

        let mut segments = Vec::new();
        for part in body.split('/').filter(|part| !part.is_empty()) {
            if part.contains('*') {
                return None;
            }
            let param = part
                .strip_prefix(':')
                .or_else(|| part.strip_prefix('{').and_then(|p| p.strip_suffix('}')));
            match param {
                Some("") => return None,
                Some(_) => segments.push(Segment::Param),
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Some(Self {
            raw: raw.to_string(),
            segments,
            prefix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern matches a request path.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|part| !part.is_empty());

        for segment in &self.segments {
            match (segment, parts.next()) {
                (Segment::Literal(expected), Some(actual)) if expected == actual => {}
                (Segment::Param, Some(_)) => {}
                _ => return false,
            }
        }

        self.prefix || parts.next().is_none()
    }

    fn specificity(&self, method_bound: bool) -> Specificity {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let kind = if self.prefix {
            0
        } else if literals == self.segments.len() {
            2
        } else {
            1
        };

        Specificity {
            kind,
            literals,
            method_bound,
        }
    }
}

/// A validated route rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    method: Option<http::Method>,
    pattern: RoutePattern,
    policy: RateLimitPolicy,
}

impl RouteRule {
    pub fn new(method: Option<http::Method>, pattern: RoutePattern, policy: RateLimitPolicy) -> Self {
        Self {
            method,
            pattern,
            policy,
        }
    }

    fn from_config(config: &RouteRuleConfig) -> std::result::Result<Self, String> {
        let method = match &config.method {
            Some(raw) => {
                Some(parse_method(raw).ok_or_else(|| format!("unknown method '{}'", raw))?)
            }
            None => None,
        };
        let pattern = RoutePattern::parse(&config.pattern)
            .ok_or_else(|| format!("invalid pattern '{}'", config.pattern))?;
        let identifier = config
            .identifier
            .clone()
            .unwrap_or_else(|| config.pattern.clone());
        let policy = RateLimitPolicy::try_new(identifier, config.limit, config.window_secs)
            .map_err(|e| e.to_string())?;

        Ok(Self::new(method, pattern, policy))
    }

    fn applies_to(&self, method: &http::Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.pattern.matches(path)
    }
}

/// Parse one of the standard HTTP methods, case-insensitively. Extension
/// methods are rejected so a misspelled method cannot load as a dead rule.
fn parse_method(raw: &str) -> Option<http::Method> {
    const STANDARD: [http::Method; 9] = [
        http::Method::GET,
        http::Method::HEAD,
        http::Method::POST,
        http::Method::PUT,
        http::Method::DELETE,
        http::Method::CONNECT,
        http::Method::OPTIONS,
        http::Method::TRACE,
        http::Method::PATCH,
    ];

    let raw = raw.trim();
    STANDARD
        .into_iter()
        .find(|method| method.as_str().eq_ignore_ascii_case(raw))
}

/// The outcome of a lookup: the policy and the pattern it was matched by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub policy: RateLimitPolicy,
    pub pattern: String,
}

/// Immutable table of route rules.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    rules: Vec<RouteRule>,
    default: RateLimitPolicy,
}

impl PolicyRegistry {
    /// Create a registry from already-validated rules.
    pub fn new(rules: Vec<RouteRule>, default: RateLimitPolicy) -> Self {
        Self { rules, default }
    }

    /// Registry with no rules; every request gets `default`.
    pub fn with_default(default: RateLimitPolicy) -> Self {
        Self::new(Vec::new(), default)
    }

    /// The rules the service ships with.
    pub fn builtin() -> Self {
        let rule = |method: Option<http::Method>, pattern: &str, policy: RateLimitPolicy| {
            // Patterns here are literals under our control.
            RoutePattern::parse(pattern).map(|p| RouteRule::new(method, p, policy))
        };

        let rules = [
            rule(Some(http::Method::POST), "/api/webhooks/*", named::WEBHOOK),
            rule(Some(http::Method::POST), "/api/contact", named::CONTACT_FORM),
            rule(Some(http::Method::POST), "/api/demo-request", named::DEMO_REQUEST),
            rule(Some(http::Method::POST), "/api/invites/:code/redeem", named::INVITE_REDEEM),
            rule(Some(http::Method::POST), "/api/auth/*", RateLimitPolicy::named("auth", 10, 60)),
            rule(Some(http::Method::GET), "/api/*", RateLimitPolicy::named("api read", 120, 60)),
            rule(None, "/api/*", RateLimitPolicy::named("api write", 60, 60)),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::new(rules, named::GLOBAL_DEFAULT)
    }

    /// Load a registry from a YAML rules file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a registry from a YAML rules document.
    ///
    /// Only a document that is not YAML at all is an error. Individual
    /// malformed rules are logged and skipped, and a malformed default falls
    /// back to the built-in global default.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: RulesDocument = serde_yaml::from_str(yaml)?;
        Ok(Self::from_document(&document))
    }

    pub fn from_document(document: &RulesDocument) -> Self {
        let rules = document
            .rules
            .iter()
            .filter_map(|config| match RouteRule::from_config(config) {
                Ok(rule) => Some(rule),
                Err(reason) => {
                    warn!(pattern = %config.pattern, reason = %reason, "Skipping malformed route rule");
                    None
                }
            })
            .collect();

        let default = match &document.default {
            Some(limit) => {
                match RateLimitPolicy::try_new(limit.identifier.clone(), limit.limit, limit.window_secs) {
                    Ok(policy) => policy,
                    Err(e) => {
                        warn!(error = %e, "Malformed default policy, using built-in default");
                        named::GLOBAL_DEFAULT
                    }
                }
            }
            None => named::GLOBAL_DEFAULT,
        };

        Self::new(rules, default)
    }

    /// Find the policy for a request. Never fails; unmatched requests get the
    /// default policy under [`DEFAULT_PATTERN`].
    pub fn resolve(&self, method: &http::Method, path: &str) -> ResolvedPolicy {
        let mut best: Option<(Specificity, &RouteRule)> = None;

        for rule in self.rules.iter().filter(|r| r.applies_to(method, path)) {
            let rank = rule.pattern.specificity(rule.method.is_some());
            // Strictly greater keeps the earlier rule on ties.
            if best.map_or(true, |(current, _)| rank > current) {
                best = Some((rank, rule));
            }
        }

        match best {
            Some((_, rule)) => ResolvedPolicy {
                policy: rule.policy.clone(),
                pattern: rule.pattern.as_str().to_string(),
            },
            None => ResolvedPolicy {
                policy: self.default.clone(),
                pattern: DEFAULT_PATTERN.to_string(),
            },
        }
    }

    pub fn default_policy(&self) -> &RateLimitPolicy {
        &self.default
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
