//! HTTP handlers for the report service.
//!
//! Every handler takes the shared context and the dispatched request.
//! All but `health` and `metrics` authenticate first through the gateway.

pub mod health;
pub mod metrics;
pub mod profile;
pub mod reports;
pub mod uploads;

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use crate::errors::ApiError;
use crate::models::Principal;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};

pub use health::health_check;
pub use metrics::metrics_handler;

/// Result type shared by the handlers.
pub type HandlerResult = Result<Response, ApiError>;

/// Authenticate the caller of `req`.
pub(crate) async fn authenticate(
    ctx: &AppContext,
    req: &DispatchRequest,
) -> Result<Principal, ApiError> {
    Ok(ctx.gateway.require_authentication(&req.headers).await?)
}

/// Success envelope: `{"ok": true, ...fields}`.
pub(crate) fn ok_envelope(status: StatusCode, fields: Value) -> Response {
    let mut body = Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(fields) = fields {
        body.extend(fields);
    }
    (status, Json(Value::Object(body))).into_response()
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_ok_envelope_merges_fields() {
        let response = ok_envelope(StatusCode::CREATED, json!({"user": {"id": 1}}));
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"ok": true, "user": {"id": 1}}));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  a ".to_string())), Some("a".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }
}
