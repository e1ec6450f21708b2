//! Baseline security headers sent on every response.

use http::header::{
    REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_DNS_PREFETCH_CONTROL,
    X_FRAME_OPTIONS,
};
use http::{HeaderMap, HeaderName, HeaderValue};

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// The security header set. Handlers that already set one of these headers
/// keep their own value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityHeaders {
    hsts: bool,
}

impl SecurityHeaders {
    pub fn new(hsts: bool) -> Self {
        Self { hsts }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        let baseline = [
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (X_FRAME_OPTIONS, "DENY"),
            (REFERRER_POLICY, "strict-origin-when-cross-origin"),
            (PERMISSIONS_POLICY, "camera=(), microphone=(), geolocation=()"),
            (X_DNS_PREFETCH_CONTROL, "off"),
        ];
        for (name, value) in baseline {
            headers
                .entry(name)
                .or_insert(HeaderValue::from_static(value));
        }

        if self.hsts {
            headers
                .entry(STRICT_TRANSPORT_SECURITY)
                .or_insert(HeaderValue::from_static("max-age=63072000; includeSubDomains"));
        }
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new(true)
    }
}
