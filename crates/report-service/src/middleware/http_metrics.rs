//! HTTP metrics middleware.
//!
//! Wraps the dispatcher so every response is counted, including 404s and
//! CORS preflights that never reach a handler. The endpoint label is the
//! route pattern the dispatcher recorded in [`MatchedRoute`], so raw paths
//! with ids never become label values.

use crate::dispatch::MatchedRoute;
use crate::observability::metrics::{record_http_request, UNMATCHED_ENDPOINT};
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Record method, matched route, status and duration for each request.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let response = next.run(request).await;

    let endpoint = response
        .extensions()
        .get::<MatchedRoute>()
        .map_or(UNMATCHED_ENDPOINT, |route| &*route.0);
    record_http_request(&method, endpoint, response.status().as_u16(), start.elapsed());

    response
}
