//! Edge dispatcher middleware.
//!
//! Every inbound request passes through [`edge_dispatch`]:
//!
//! ```text
//! excluded path ──────────────► pass + security headers
//! outside the API prefix ─────► pass + security headers
//! resolve → derive → decide ─┬► denied:   429 + rate limit + security headers
//!                            ├► admitted: pass + rate limit + security headers
//!                            └► failed:   pass + security headers
//! ```

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::trace;

use super::gate::{Admission, AdmissionGate, RequestFacts};
use super::response::{too_many_requests, with_rate_limit_headers, X_RATELIMIT_LIMIT};
use super::security::SecurityHeaders;
use crate::ratelimit::{KeyNamespace, PolicyRegistry, RouteIdentity};

/// How the dispatcher treats a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Skips admission control
    Excluded,
    /// Outside the API; security headers only
    NonApi,
    /// Rate limited
    Api,
}

/// State for the edge middleware. Cheap to clone.
#[derive(Clone)]
pub struct EdgeDispatcher {
    gate: AdmissionGate,
    registry: Arc<PolicyRegistry>,
    api_prefix: Arc<str>,
    excluded_prefixes: Arc<[String]>,
    security: SecurityHeaders,
}

impl EdgeDispatcher {
    pub fn new(gate: AdmissionGate, registry: Arc<PolicyRegistry>) -> Self {
        Self {
            gate,
            registry,
            api_prefix: Arc::from("/api"),
            excluded_prefixes: Arc::from(Vec::new()),
            security: SecurityHeaders::default(),
        }
    }

    pub fn with_api_prefix(mut self, prefix: &str) -> Self {
        self.api_prefix = Arc::from(prefix.trim_end_matches('/'));
        self
    }

    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.excluded_prefixes = Arc::from(prefixes);
        self
    }

    pub fn with_security_headers(mut self, security: SecurityHeaders) -> Self {
        self.security = security;
        self
    }

    pub fn classify(&self, path: &str) -> PathClass {
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| under_prefix(path, prefix))
        {
            return PathClass::Excluded;
        }

        let prefix = &*self.api_prefix;
        if prefix.is_empty() || under_prefix(path, prefix) {
            PathClass::Api
        } else {
            PathClass::NonApi
        }
    }

    /// Resolve, derive and decide for one API request.
    pub async fn admit(&self, facts: &RequestFacts) -> Admission {
        let decision = async {
            let resolved = self.registry.resolve(&facts.method, &facts.path);
            let route = RouteIdentity::new(
                facts.method.as_str(),
                resolved.pattern,
                resolved.policy.identifier(),
            );
            self.gate
                .evaluate(KeyNamespace::Edge, &route, facts, &resolved.policy)
                .await
        };

        self.gate.run(KeyNamespace::Edge, decision).await
    }
}

/// Whether `path` is `prefix` or lies below it. Matches whole segments only,
/// so `/api/auth/session` does not cover `/api/auth/sessionfoo`.
fn under_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix).is_some_and(|rest| {
        prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/')
    })
}

/// Axum middleware for the edge dispatcher.
///
/// Install with `axum::middleware::from_fn_with_state(edge, edge_dispatch)`
/// as the outermost layer.
pub async fn edge_dispatch(State(edge): State<EdgeDispatcher>, req: Request, next: Next) -> Response {
    let class = edge.classify(req.uri().path());
    trace!(path = %req.uri().path(), class = ?class, "Dispatching request");

    let mut response = match class {
        PathClass::Excluded | PathClass::NonApi => next.run(req).await,
        PathClass::Api => {
            let facts = edge.gate.facts(&req);
            match edge.admit(&facts).await {
                Admission::Denied(decision) => too_many_requests(&decision.result, &decision.policy),
                Admission::Admitted(decision) => {
                    let response = next.run(req).await;
                    // A route limiter that denied the request already set its own headers.
                    if response.headers().contains_key(X_RATELIMIT_LIMIT) {
                        response
                    } else {
                        with_rate_limit_headers(response, &decision.result)
                    }
                }
                Admission::Bypassed => next.run(req).await,
            }
        }
    };

    edge.security.apply(response.headers_mut());
    response
}
