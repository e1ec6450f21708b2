//! HTTP server assembly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::dispatcher::{edge_dispatch, EdgeDispatcher};
use super::gate::AdmissionGate;
use super::security::SecurityHeaders;
use super::wrapper::{wrap, RouteLimiter};
use crate::config::ClubgateConfig;
use crate::error::{ClubgateError, Result};
use crate::ratelimit::policy::named;
use crate::ratelimit::{AdmissionEngine, Clock, InMemoryCounterStore, PolicyRegistry};

/// The admission components built from one configuration, sharing one
/// counter store.
#[derive(Clone)]
pub struct AdmissionStack {
    pub store: Arc<InMemoryCounterStore>,
    pub edge: EdgeDispatcher,
    pub routes: RouteLimiter,
}

impl AdmissionStack {
    pub fn from_config(config: &ClubgateConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let settings = &config.admission;
        let registry = match &settings.rules_path {
            Some(path) => PolicyRegistry::from_file(path)?,
            None => PolicyRegistry::builtin(),
        };
        info!(rules = registry.len(), default = %registry.default_policy(), "Policy registry ready");

        let store = Arc::new(InMemoryCounterStore::new(Arc::clone(&clock)));
        let engine = AdmissionEngine::new(store.clone(), clock);
        let gate = AdmissionGate::new(engine)
            .with_trust_forwarded_for(settings.trust_forwarded_for)
            .with_verbose_logging(config.logging.verbose_admission);

        let edge = EdgeDispatcher::new(gate.clone(), Arc::new(registry))
            .with_api_prefix(&settings.api_prefix)
            .with_excluded_prefixes(settings.excluded_prefixes.clone())
            .with_security_headers(SecurityHeaders::new(settings.hsts));

        Ok(Self {
            store,
            edge,
            routes: RouteLimiter::new(gate),
        })
    }

    /// Put the edge dispatcher in front of every route of `router`.
    pub fn protect(&self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self.edge.clone(), edge_dispatch))
    }
}

/// The public endpoints this service answers itself.
pub fn public_router(limiter: &RouteLimiter) -> Router {
    Router::new()
        .route("/", get(|| async { "clubgate" }))
        .route("/api/health", get(health))
        .route(
            "/api/contact",
            post(wrap(accept_submission, limiter, named::CONTACT_FORM)),
        )
        .route(
            "/api/demo-request",
            post(wrap(accept_submission, limiter, named::DEMO_REQUEST)),
        )
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Accept a public form submission. Delivery is handled downstream.
async fn accept_submission(Json(payload): Json<Value>) -> (StatusCode, Json<Value>) {
    let fields = payload.as_object().map_or(0, |object| object.len());
    (StatusCode::ACCEPTED, Json(json!({ "status": "received", "fields": fields })))
}

/// HTTP server for the admission-controlled API.
pub struct AdmissionServer {
    addr: SocketAddr,
    router: Router,
}

impl AdmissionServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ClubgateError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::SystemClock;

    #[test]
    fn test_stack_from_default_config() {
        let stack = AdmissionStack::from_config(&ClubgateConfig::default(), Arc::new(SystemClock::new()));
        assert!(stack.is_ok());
    }

    #[test]
    fn test_missing_rules_file_is_an_error() {
        let mut config = ClubgateConfig::default();
        config.admission.rules_path = Some("/nonexistent/clubgate-rules.yaml".to_string());

        let result = AdmissionStack::from_config(&config, Arc::new(SystemClock::new()));
        assert!(matches!(result, Err(ClubgateError::Io(_))));
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let stack = AdmissionStack::from_config(&ClubgateConfig::default(), Arc::new(SystemClock::new())).unwrap();
        let _server = AdmissionServer::new(addr, stack.protect(public_router(&stack.routes)));
    }
}
