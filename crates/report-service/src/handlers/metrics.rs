//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! Unauthenticated so Prometheus can scrape it. Labels are bounded and
//! carry no identities.

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use std::sync::Arc;

/// Handler for GET /metrics
///
/// Returns Prometheus text format:
/// ```text
/// # TYPE rs_http_requests_total counter
/// rs_http_requests_total{method="GET",endpoint="/lost-items/{id}",status_code="200"} 42
/// ```
#[tracing::instrument(skip_all, name = "rs.metrics.scrape")]
pub async fn metrics_handler(ctx: Arc<AppContext>, _req: DispatchRequest) -> String {
    ctx.metrics.render()
}
