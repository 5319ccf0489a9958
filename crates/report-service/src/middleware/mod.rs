//! HTTP middleware for the report service.

pub mod envelope;
pub mod http_metrics;

pub use envelope::{preflight_no_content, request_timeout};
pub use http_metrics::http_metrics_middleware;
