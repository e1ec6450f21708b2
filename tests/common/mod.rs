#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::{middleware, Router};
use http_body_util::BodyExt;

use clubgate::config::AdmissionConfig;
use clubgate::error::{ClubgateError, Result};
use clubgate::ratelimit::{
    AdmissionEngine, CounterStore, InMemoryCounterStore, ManualClock, PolicyRegistry,
    RateLimitKey, WindowCount,
};
use clubgate::web::{edge_dispatch, AdmissionGate, EdgeDispatcher, RouteLimiter};

pub const START_EPOCH: i64 = 1_700_000_000;

/// Components wired to a manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<InMemoryCounterStore>,
    pub gate: AdmissionGate,
}

impl Harness {
    pub fn new() -> Self {
        let clock = ManualClock::at_epoch_secs(START_EPOCH);
        let store = Arc::new(InMemoryCounterStore::new(Arc::new(clock.clone())));
        let engine = AdmissionEngine::new(store.clone(), Arc::new(clock.clone()));
        Self {
            clock,
            store,
            gate: AdmissionGate::new(engine),
        }
    }

    /// A harness whose store fails every increment.
    pub fn failing() -> Self {
        let mut harness = Self::new();
        let engine = AdmissionEngine::new(Arc::new(FailingStore), Arc::new(harness.clock.clone()));
        harness.gate = AdmissionGate::new(engine);
        harness
    }

    pub fn edge(&self, registry: PolicyRegistry) -> EdgeDispatcher {
        EdgeDispatcher::new(self.gate.clone(), Arc::new(registry))
            .with_excluded_prefixes(AdmissionConfig::default().excluded_prefixes)
    }

    pub fn routes(&self) -> RouteLimiter {
        RouteLimiter::new(self.gate.clone())
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment(&self, _key: &RateLimitKey, _window: Duration) -> Result<WindowCount> {
        Err(ClubgateError::Store("connection refused".to_string()))
    }
}

pub fn protect(router: Router, edge: EdgeDispatcher) -> Router {
    router.layer(middleware::from_fn_with_state(edge, edge_dispatch))
}

pub fn request(method: &str, uri: &str, client_ip: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client_ip)
        .header("content-type", "application/json")
        .body(Body::from("{\"name\":\"Ada\",\"message\":\"hello\"}"))
        .unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn has_security_headers(response: &Response) -> bool {
    header(response, "x-content-type-options") == Some("nosniff")
        && header(response, "x-frame-options") == Some("DENY")
        && response.headers().contains_key("referrer-policy")
}
