//! Observability for the report service.
//!
//! Structured logging is configured in `main.rs` via `tracing-subscriber`;
//! this module holds the Prometheus metric definitions.

pub mod metrics;
