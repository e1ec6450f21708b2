//! The admission boundary shared by the edge dispatcher and route limiters.
//!
//! Everything that can go wrong while deciding (a store error, a panic in
//! resolution or key derivation) is absorbed here and turned into
//! [`Admission::Bypassed`]. Callers only ever see a denial when a quota was
//! really exhausted.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use axum::extract::{ConnectInfo, Request};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ratelimit::{
    derive_key, AdmissionEngine, AdmissionResult, ClientIdentity, KeyNamespace, RateLimitPolicy,
    RouteIdentity,
};

/// Identifier of the signed-in user, inserted into request extensions by
/// the authentication layer. Absent for anonymous traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedUser(pub String);

/// A decision together with the policy it was made under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub result: AdmissionResult,
    pub policy: RateLimitPolicy,
}

/// What the gate decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Within quota
    Admitted(Decision),
    /// Quota exhausted; respond 429
    Denied(Decision),
    /// The check itself failed and the request was let through
    Bypassed,
}

impl Admission {
    pub fn is_denied(&self) -> bool {
        matches!(self, Admission::Denied(_))
    }
}

/// The parts of a request admission control looks at, copied out so the
/// decision future does not borrow the request.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub method: http::Method,
    pub path: String,
    pub client: ClientIdentity,
    pub user: Option<String>,
}

impl RequestFacts {
    pub fn from_request(req: &Request, trust_forwarded_for: bool) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            client: ClientIdentity::from_headers(req.headers(), peer, trust_forwarded_for),
            user: req
                .extensions()
                .get::<AuthenticatedUser>()
                .map(|user| user.0.clone()),
        }
    }
}

/// Shared admission logic with fail-open semantics.
#[derive(Clone)]
pub struct AdmissionGate {
    engine: AdmissionEngine,
    trust_forwarded_for: bool,
    verbose: bool,
}

impl AdmissionGate {
    pub fn new(engine: AdmissionEngine) -> Self {
        Self {
            engine,
            trust_forwarded_for: true,
            verbose: false,
        }
    }

    /// Whether forwarding headers identify the client.
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Log denials at info instead of debug.
    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn facts(&self, req: &Request) -> RequestFacts {
        RequestFacts::from_request(req, self.trust_forwarded_for)
    }

    /// Derive the key for a request and count it against `policy`.
    pub async fn evaluate(
        &self,
        namespace: KeyNamespace,
        route: &RouteIdentity,
        facts: &RequestFacts,
        policy: &RateLimitPolicy,
    ) -> Result<Decision> {
        let key = derive_key(namespace, route, &facts.client, facts.user.as_deref());
        let result = self.engine.decide(&key, policy).await?;

        if !result.allowed {
            if self.verbose {
                info!(
                    namespace = namespace.as_str(),
                    policy = %policy,
                    client = facts.client.as_str(),
                    path = %facts.path,
                    "Request denied by rate limit"
                );
            } else {
                debug!(
                    namespace = namespace.as_str(),
                    policy = policy.identifier(),
                    client = facts.client.as_str(),
                    "Request denied by rate limit"
                );
            }
        }

        Ok(Decision {
            result,
            policy: policy.clone(),
        })
    }

    /// Run a decision, absorbing errors and panics into `Bypassed`.
    pub async fn run<F>(&self, namespace: KeyNamespace, decision: F) -> Admission
    where
        F: Future<Output = Result<Decision>>,
    {
        match AssertUnwindSafe(decision).catch_unwind().await {
            Ok(Ok(decision)) if decision.result.allowed => Admission::Admitted(decision),
            Ok(Ok(decision)) => Admission::Denied(decision),
            Ok(Err(e)) => {
                warn!(
                    namespace = namespace.as_str(),
                    error = %e,
                    "Admission check failed, allowing request"
                );
                Admission::Bypassed
            }
            Err(_) => {
                warn!(
                    namespace = namespace.as_str(),
                    "Admission check panicked, allowing request"
                );
                Admission::Bypassed
            }
        }
    }
}
