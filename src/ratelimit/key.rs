//! Composite admission key derivation.
//!
//! A key identifies one counter. It combines the keyspace namespace, the
//! policy identifier, the route identity (method plus matched pattern) and
//! the client identity, plus the authenticated user when there is one.

use std::fmt;
use std::net::IpAddr;

use http::HeaderMap;
use tracing::trace;

/// Delimiter between key components.
const DELIMITER: char = '|';
/// Identity shared by every request whose origin cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Keyspace a counter lives in. Edge and route limiters never share counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    /// The coarse limiter run by the edge dispatcher.
    Edge,
    /// A dedicated limiter wrapped around a single handler.
    Route,
}

impl KeyNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyNamespace::Edge => "edge",
            KeyNamespace::Route => "route",
        }
    }
}

/// Where a request came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Resolve the client address for a request.
    ///
    /// Forwarding headers are only consulted when the deployment sits behind
    /// a proxy that sets them (`trust_forwarded`). The first entry of
    /// `X-Forwarded-For` wins, then `X-Real-IP`, then the socket peer. Entries
    /// that are not IP addresses are ignored. With nothing usable the request
    /// falls into the shared `unknown` bucket.
    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> Self {
        if trust_forwarded {
            let forwarded = header_str(headers, FORWARDED_FOR)
                .and_then(|chain| chain.split(',').next())
                .and_then(parse_ip);
            if let Some(ip) = forwarded {
                return Self::from_ip(ip);
            }

            if let Some(ip) = header_str(headers, REAL_IP).and_then(parse_ip) {
                return Self::from_ip(ip);
            }
        }

        match peer {
            Some(ip) => Self::from_ip(ip),
            None => Self::unknown(),
        }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        // Collapse IPv4-mapped IPv6 so both spellings share a bucket.
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        Self(ip.to_string())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Which route and policy a counter belongs to.
///
/// Built from the matched pattern, never the raw path, so that path
/// parameters do not fragment one route into many buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteIdentity {
    pub method: String,
    pub pattern: String,
    pub policy: String,
}

impl RouteIdentity {
    pub fn new(
        method: impl Into<String>,
        pattern: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            pattern: pattern.into(),
            policy: policy.into(),
        }
    }
}

/// An opaque counter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Wrap an already-derived key string. Prefer [`derive_key`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the composite key for a request.
///
/// Every component is escaped before joining, so no component can contain
/// the delimiter and distinct inputs never produce the same key. An absent
/// user omits the trailing component entirely.
pub fn derive_key(
    namespace: KeyNamespace,
    route: &RouteIdentity,
    client: &ClientIdentity,
    user: Option<&str>,
) -> RateLimitKey {
    let mut key = String::with_capacity(64);
    key.push_str(namespace.as_str());

    let components = [
        route.policy.as_str(),
        route.method.as_str(),
        route.pattern.as_str(),
        client.as_str(),
    ];
    for component in components.into_iter().chain(user) {
        key.push(DELIMITER);
        push_escaped(&mut key, component);
    }

    trace!(key = %key, "Derived admission key");
    RateLimitKey(key)
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%7C"),
            other => out.push(other),
        }
    }
}
