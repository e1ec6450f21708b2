//! Per-endpoint rate limiting.
//!
//! A route limiter gives one handler its own quota on top of the edge
//! dispatcher's coarse one. The two are independent gates: a request has to
//! pass both, and their counters live in separate keyspaces.
//!
//! ```ignore
//! let limiter = RouteLimiter::new(gate);
//! let app = Router::new()
//!     .route("/api/contact", post(wrap(submit_contact, &limiter, named::CONTACT_FORM)));
//! ```

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::extract::{MatchedPath, Request};
use axum::handler::{Handler, Layered};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service, ServiceExt};

use super::gate::{Admission, AdmissionGate};
use super::response::too_many_requests;
use crate::ratelimit::{KeyNamespace, RateLimitPolicy, RouteIdentity};

/// Hands out per-route layers that share one admission gate.
#[derive(Clone)]
pub struct RouteLimiter {
    gate: AdmissionGate,
}

impl RouteLimiter {
    pub fn new(gate: AdmissionGate) -> Self {
        Self { gate }
    }

    /// A layer enforcing `policy` on whatever it wraps.
    pub fn layer(&self, policy: RateLimitPolicy) -> RouteLimitLayer {
        RouteLimitLayer {
            gate: self.gate.clone(),
            policy,
        }
    }
}

/// Wrap a handler with its own rate limit.
///
/// The returned handler takes the same extractors as `handler`. A denied
/// request gets the standard 429 response and never reaches `handler`; an
/// admitted one gets `handler`'s response unchanged.
pub fn wrap<H, T, S>(
    handler: H,
    limiter: &RouteLimiter,
    policy: RateLimitPolicy,
) -> Layered<RouteLimitLayer, H, T, S>
where
    H: Handler<T, S>,
    T: 'static,
    S: Clone + Send + Sync + 'static,
{
    handler.layer(limiter.layer(policy))
}

/// Tower layer for [`RouteLimit`].
#[derive(Clone)]
pub struct RouteLimitLayer {
    gate: AdmissionGate,
    policy: RateLimitPolicy,
}

impl<S> Layer<S> for RouteLimitLayer {
    type Service = RouteLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RouteLimit {
            inner,
            gate: self.gate.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// A service that checks a route quota before calling `inner`.
#[derive(Clone)]
pub struct RouteLimit<S> {
    inner: S,
    gate: AdmissionGate,
    policy: RateLimitPolicy,
}

impl<S> Service<Request> for RouteLimit<S>
where
    S: Service<Request, Error = Infallible> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked on the clone that serves the call.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let gate = self.gate.clone();
        let policy = self.policy.clone();

        let facts = gate.facts(&req);
        let pattern = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| facts.path.clone());
        let route = RouteIdentity::new(facts.method.as_str(), pattern, policy.identifier());

        Box::pin(async move {
            let admission = gate
                .run(
                    KeyNamespace::Route,
                    gate.evaluate(KeyNamespace::Route, &route, &facts, &policy),
                )
                .await;

            if let Admission::Denied(decision) = admission {
                return Ok(too_many_requests(&decision.result, &decision.policy));
            }

            let response = inner.oneshot(req).await?;
            Ok(response.into_response())
        })
    }
}
