//! Metrics definitions for the report service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rs_` prefix for the report service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: HTTP methods
//! - `endpoint`: registered route patterns, never raw paths
//! - `outcome` / `result`: fixed sets per metric
//! - `operation`: bounded by repository code
//!
//! No label ever carries a token, subject, email or path parameter.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Endpoint label used when no route matched.
pub const UNMATCHED_ENDPOINT: &str = "/other";

/// Initialize the Prometheus recorder and return the handle used by
/// `GET /metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // HTTP request buckets
        .set_buckets_for_metric(
            Matcher::Full("rs_http_request_duration_seconds".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Key source fetches are external HTTP calls bounded by the fetch timeout
        .set_buckets_for_metric(
            Matcher::Full("rs_jwks_fetch_duration_seconds".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set key fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("rs_db_query_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rs_http_requests_total`, `rs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
///
/// `endpoint` is the matched route pattern (e.g. `/lost-items/{id}`), or
/// [`UNMATCHED_ENDPOINT`].
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let status = categorize_status_code(status_code);

    histogram!("rs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("rs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record a token verification outcome
///
/// Metric: `rs_token_validations_total`
/// Labels: `outcome` (`success` or a `TokenError` code)
pub fn record_token_validation(outcome: &'static str) {
    counter!("rs_token_validations_total", "outcome" => outcome).increment(1);
}

/// Record a key source fetch
///
/// Metric: `rs_jwks_fetches_total`, `rs_jwks_fetch_duration_seconds`
/// Labels: `outcome` (success, transport_error, http_error, parse_error)
pub fn record_jwks_fetch(outcome: &'static str, duration: Duration) {
    histogram!("rs_jwks_fetch_duration_seconds").record(duration.as_secs_f64());
    counter!("rs_jwks_fetches_total", "outcome" => outcome).increment(1);
}

/// Record where a key set lookup was served from
///
/// Metric: `rs_jwks_cache_total`
/// Labels: `result` (memory, file, fetched, stale, unavailable)
pub fn record_jwks_cache(result: &'static str) {
    counter!("rs_jwks_cache_total", "result" => result).increment(1);
}

/// Record a first-login principal creation
///
/// Metric: `rs_principals_provisioned_total`
/// Labels: `role`
pub fn record_principal_provisioned(role: &'static str) {
    counter!("rs_principals_provisioned_total", "role" => role).increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `rs_db_query_duration_seconds`, `rs_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("rs_db_query_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("rs_db_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(404), "error");
        assert_eq!(categorize_status_code(500), "error");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_record_functions_without_recorder() {
        // No recorder installed: these go to the no-op recorder and must not panic.
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("GET", UNMATCHED_ENDPOINT, 404, Duration::from_millis(1));
        record_token_validation("success");
        record_jwks_fetch("transport_error", Duration::from_millis(30));
        record_jwks_cache("stale");
        record_principal_provisioned("admin");
        record_db_query("find_by_external_id", "success", Duration::from_millis(2));
    }

    #[test]
    fn test_http_request_labels_use_route_pattern() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_http_request("GET", "/lost-items/{id}", 200, Duration::from_millis(12));
            record_http_request("GET", "/lost-items/{id}", 200, Duration::from_millis(8));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "rs_http_requests_total")
            .map(|(key, _, _, value)| (key.key().clone(), value));

        let Some((key, &DebugValue::Counter(count))) = counter else {
            unreachable!("request counter was not recorded");
        };
        assert_eq!(count, 2);
        assert!(key
            .labels()
            .any(|l| l.key() == "endpoint" && l.value() == "/lost-items/{id}"));
    }
}
