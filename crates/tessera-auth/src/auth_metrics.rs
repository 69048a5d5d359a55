//! Auth metrics
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `tessera_tokens_issued_total` - Token pairs issued (labels: origin = issue | rotate)
//! - `tessera_token_verifications_total` - Verification attempts (labels: result = error code or `ok`)
//! - `tessera_revocations_total` - Revocations written (labels: kind = token | family)
//! - `tessera_csrf_rejections_total` - Requests rejected by the CSRF guard
//! - `tessera_rate_limited_total` - Requests rejected by the rate limiter

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Register metric descriptions. Idempotent; call once at startup.
#[cfg(feature = "metrics")]
pub fn init_auth_metrics() {
    INIT.call_once(|| {
        describe_counter!("tessera_tokens_issued_total", "Token pairs issued");
        describe_counter!(
            "tessera_token_verifications_total",
            "Token verification attempts by result"
        );
        describe_counter!("tessera_revocations_total", "Revocation entries written");
        describe_counter!(
            "tessera_csrf_rejections_total",
            "Requests rejected by the CSRF guard"
        );
        describe_counter!(
            "tessera_rate_limited_total",
            "Requests rejected by the rate limiter"
        );
    });
}

#[cfg(feature = "metrics")]
pub(crate) fn record_token_issued(origin: &'static str) {
    counter!("tessera_tokens_issued_total", "origin" => origin).increment(1);
}

/// `result` is `ok` or an [`AuthError::code`](crate::error::AuthError::code)
#[cfg(feature = "metrics")]
pub(crate) fn record_verification(result: &'static str) {
    counter!("tessera_token_verifications_total", "result" => result).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_revocation(kind: &'static str) {
    counter!("tessera_revocations_total", "kind" => kind).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_csrf_rejection() {
    counter!("tessera_csrf_rejections_total").increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_rate_limited() {
    counter!("tessera_rate_limited_total").increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_auth_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_token_issued(_origin: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_verification(_result: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_revocation(_kind: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_csrf_rejection() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rate_limited() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_auth_metrics() {
        // Should not panic even when called multiple times
        init_auth_metrics();
        init_auth_metrics();
    }

    #[test]
    fn test_record_functions() {
        init_auth_metrics();
        record_token_issued("issue");
        record_token_issued("rotate");
        record_verification("ok");
        record_verification("TOKEN_REVOKED");
        record_revocation("token");
        record_revocation("family");
        record_csrf_rejection();
        record_rate_limited();
    }
}
