//! Rate limit response headers and the 429 payload.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::ratelimit::{AdmissionResult, RateLimitPolicy};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const TOO_MANY_REQUESTS: &str = "Too Many Requests";

/// JSON body sent with every 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TooManyRequestsBody {
    pub error: String,
    pub message: String,
    /// Epoch seconds at which the window resets
    pub retry_after: i64,
}

/// Rate limit headers for a decision. `Retry-After` is only present on a
/// denial.
pub fn rate_limit_headers(result: &AdmissionResult) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);
    apply_rate_limit_headers(&mut headers, result);
    headers
}

/// Write the rate limit headers into an existing header map, replacing any
/// values already there.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_at.timestamp()));

    if !result.allowed {
        headers.insert(RETRY_AFTER, HeaderValue::from(result.retry_after_secs()));
    }
}

/// Attach rate limit headers to a response without touching its status or
/// body.
pub fn with_rate_limit_headers(mut response: Response, result: &AdmissionResult) -> Response {
    apply_rate_limit_headers(response.headers_mut(), result);
    response
}

/// The 429 response for a denied request.
pub fn too_many_requests(result: &AdmissionResult, policy: &RateLimitPolicy) -> Response {
    let retry_after = result.retry_after_secs();
    let body = TooManyRequestsBody {
        error: TOO_MANY_REQUESTS.to_string(),
        message: format!(
            "Rate limit exceeded for {}. Try again in {} second{}.",
            policy.identifier(),
            retry_after,
            if retry_after == 1 { "" } else { "s" }
        ),
        retry_after: result.reset_at.timestamp(),
    };

    (StatusCode::TOO_MANY_REQUESTS, rate_limit_headers(result), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::named;
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;

    fn result(allowed: bool, remaining: u64) -> AdmissionResult {
        let decided_at: DateTime<Utc> = DateTime::from_timestamp(1_700_000_010, 0).unwrap();
        AdmissionResult {
            allowed,
            remaining,
            reset_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
            limit: 5,
            decided_at,
        }
    }

    #[test]
    fn test_headers_on_success() {
        let headers = rate_limit_headers(&result(true, 3));
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "3");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000060");
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_headers_on_denial_include_retry_after() {
        let headers = rate_limit_headers(&result(false, 0));
        assert_eq!(headers[RETRY_AFTER], "50");
    }

    #[test]
    fn test_with_headers_preserves_status() {
        let response = (StatusCode::ACCEPTED, "queued").into_response();
        let response = with_rate_limit_headers(response, &result(true, 4));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "4");
    }

    #[tokio::test]
    async fn test_too_many_requests_payload() {
        let response = too_many_requests(&result(false, 0), &named::CONTACT_FORM);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "50");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["retryAfter"], 1_700_000_060);
        assert_eq!(
            body["message"],
            "Rate limit exceeded for contact form. Try again in 50 seconds."
        );
    }
}
