//! Keeps responses produced outside the dispatcher in the service's shape.
//!
//! CORS preflights answer `204 No Content`, and a request that outlives its
//! deadline gets the JSON error envelope like any other failure.

use crate::errors::ApiError;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

/// Answer the request with a `408 request_timeout` envelope if the inner
/// service has not produced a response within the configured duration.
pub async fn request_timeout(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                target: "rs.http",
                method = %method,
                path = %path,
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Request timed out"
            );
            ApiError::RequestTimeout.into_response()
        }
    }
}

/// Rewrite a successful CORS preflight answer to `204 No Content`.
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = next.run(request).await;
    if is_preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}
