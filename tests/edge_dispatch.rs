mod common;

use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceExt;

use clubgate::ratelimit::policy::named;
use clubgate::ratelimit::{PolicyRegistry, RateLimitPolicy, RoutePattern, RouteRule};
use clubgate::web::AuthenticatedUser;
use common::{has_security_headers, header, json_body, protect, request, Harness, START_EPOCH};

fn api_router() -> Router {
    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/api/ping", get(|| async { "pong" }))
        .route("/api/clubs", get(|| async { "[]" }))
        .route("/api/contact", post(|| async { StatusCode::ACCEPTED }))
        .route("/api/auth/session", get(|| async { "session" }))
        .route("/_next/static/app.js", get(|| async { "js" }))
}

fn registry_with(method: Method, pattern: &str, policy: RateLimitPolicy) -> PolicyRegistry {
    let rule = RouteRule::new(Some(method), RoutePattern::parse(pattern).unwrap(), policy);
    PolicyRegistry::new(vec![rule], named::GLOBAL_DEFAULT)
}

fn contact_app(harness: &Harness) -> Router {
    let registry = registry_with(Method::POST, "/api/contact", named::CONTACT_FORM);
    protect(api_router(), harness.edge(registry))
}

#[tokio::test]
async fn test_contact_form_quota_then_429() {
    let harness = Harness::new();
    let app = contact_app(&harness);

    for expected_remaining in ["4", "3", "2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/contact", "192.168.1.100"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(header(&response, "x-ratelimit-limit"), Some("5"));
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some(expected_remaining));
        assert!(header(&response, "retry-after").is_none());
        harness.advance_secs(2);
    }

    let response = app
        .clone()
        .oneshot(request("POST", "/api/contact", "192.168.1.100"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(has_security_headers(&response));
    assert_eq!(header(&response, "retry-after"), Some("50"));
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("0"));

    let now = START_EPOCH + 10;
    let body = json_body(response).await;
    assert_eq!(body["error"], "Too Many Requests");
    let retry_after = body["retryAfter"].as_i64().unwrap();
    assert!(retry_after >= now);
    assert!(retry_after <= START_EPOCH + 60);
}

#[tokio::test]
async fn test_new_window_after_expiry() {
    let harness = Harness::new();
    let app = contact_app(&harness);

    for _ in 0..5 {
        app.clone()
            .oneshot(request("POST", "/api/contact", "10.0.0.1"))
            .await
            .unwrap();
    }

    harness.advance_secs(61);
    let response = app
        .oneshot(request("POST", "/api/contact", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("4"));
}

#[tokio::test]
async fn test_different_ips_have_separate_limits() {
    let harness = Harness::new();
    let policy = RateLimitPolicy::try_new("ping", 1, 60).unwrap();
    let app = protect(api_router(), harness.edge(registry_with(Method::GET, "/api/ping", policy)));

    let first = app.clone().oneshot(request("GET", "/api/ping", "10.0.0.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let other_ip = app.clone().oneshot(request("GET", "/api/ping", "10.0.0.2")).await.unwrap();
    assert_eq!(other_ip.status(), StatusCode::OK);

    let repeat = app.oneshot(request("GET", "/api/ping", "10.0.0.1")).await.unwrap();
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_authenticated_user_has_own_bucket() {
    let harness = Harness::new();
    let policy = RateLimitPolicy::try_new("ping", 1, 60).unwrap();
    let app = protect(api_router(), harness.edge(registry_with(Method::GET, "/api/ping", policy)));

    let anonymous = app.clone().oneshot(request("GET", "/api/ping", "10.0.0.1")).await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::OK);

    let mut signed_in = request("GET", "/api/ping", "10.0.0.1");
    signed_in
        .extensions_mut()
        .insert(AuthenticatedUser("member-7".to_string()));
    let response = app.oneshot(signed_in).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_store_failure_passes_through() {
    let harness = Harness::failing();
    let policy = RateLimitPolicy::try_new("ping", 1, 60).unwrap();
    let app = protect(api_router(), harness.edge(registry_with(Method::GET, "/api/ping", policy)));

    for _ in 0..5 {
        let response = app.clone().oneshot(request("GET", "/api/ping", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(has_security_headers(&response));
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn test_excluded_paths_are_never_limited() {
    let harness = Harness::new();
    let registry = PolicyRegistry::with_default(RateLimitPolicy::try_new("tiny", 1, 60).unwrap());
    let app = protect(api_router(), harness.edge(registry));

    for uri in ["/api/auth/session", "/_next/static/app.js"] {
        for _ in 0..10 {
            let response = app.clone().oneshot(request("GET", uri, "10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(has_security_headers(&response));
            assert!(header(&response, "x-ratelimit-limit").is_none());
        }
    }
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_non_api_paths_get_security_headers_only() {
    let harness = Harness::new();
    let registry = PolicyRegistry::with_default(RateLimitPolicy::try_new("tiny", 1, 60).unwrap());
    let app = protect(api_router(), harness.edge(registry));

    for _ in 0..3 {
        let response = app.clone().oneshot(request("GET", "/", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(has_security_headers(&response));
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn test_unmatched_api_path_uses_default_policy() {
    let harness = Harness::new();
    let registry = PolicyRegistry::with_default(RateLimitPolicy::try_new("tiny", 2, 60).unwrap());
    let app = protect(api_router(), harness.edge(registry));

    let response = app.clone().oneshot(request("GET", "/api/clubs", "10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), Some("2"));
    assert!(has_security_headers(&response));
}

#[tokio::test]
async fn test_concurrent_burst_admits_exactly_limit() {
    let harness = Harness::new();
    let policy = RateLimitPolicy::try_new("burst", 40, 60).unwrap();
    let app = protect(api_router(), harness.edge(registry_with(Method::GET, "/api/ping", policy)));

    let calls = (0..100).map(|_| {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(request("GET", "/api/ping", "172.16.0.1"))
                .await
                .unwrap()
                .status()
        })
    });

    let statuses = futures::future::join_all(calls).await;
    let admitted = statuses
        .iter()
        .filter(|status| *status.as_ref().unwrap() == StatusCode::OK)
        .count();
    let denied = statuses
        .iter()
        .filter(|status| *status.as_ref().unwrap() == StatusCode::TOO_MANY_REQUESTS)
        .count();

    assert_eq!(admitted, 40);
    assert_eq!(denied, 60);
}
