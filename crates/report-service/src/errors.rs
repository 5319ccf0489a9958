//! Report service error types.
//!
//! Every failure leaves the service as a JSON envelope
//! `{"ok": false, "error": "<code>", "message": "..."}`. Codes are stable
//! identifiers clients branch on; messages are informational. Internal
//! details are logged server-side and never returned.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Value of the `WWW-Authenticate` header sent with every 401.
pub const WWW_AUTHENTICATE_VALUE: &str = r#"Bearer realm="traceq", error="invalid_token""#;

/// Report service error type.
///
/// Maps to HTTP status codes:
/// - AuthRequired, InvalidToken, TokenExpired: 401 Unauthorized
/// - AccountDisabled, Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - BadRequest: 400 Bad Request
/// - Validation: 422 Unprocessable Entity
/// - RequestTimeout: 408 Request Timeout
/// - ServiceUnavailable: 503 Service Unavailable
/// - Database, ObjectStorage, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Not found: {code}")]
    NotFound {
        code: &'static str,
        message: &'static str,
    },

    #[error("Forbidden: {code}")]
    Forbidden { code: &'static str },

    #[error("Bad request: {code}")]
    BadRequest {
        code: &'static str,
        message: String,
    },

    #[error("Validation failed: {code}")]
    Validation {
        code: &'static str,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// The 404 returned when no route matches.
    #[must_use]
    pub fn route_not_found() -> Self {
        ApiError::NotFound {
            code: "not_found",
            message: "Route not found",
        }
    }

    /// Shorthand for a 422 with code `validation_failed`.
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            code: "validation_failed",
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired | ApiError::InvalidToken(_) | ApiError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::AccountDisabled | ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::ObjectStorage(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable client-facing error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired => "auth_required",
            ApiError::InvalidToken(_) => "invalid_token",
            ApiError::TokenExpired => "token_expired",
            ApiError::AccountDisabled => "account_disabled",
            ApiError::NotFound { code, .. }
            | ApiError::Forbidden { code }
            | ApiError::BadRequest { code, .. }
            | ApiError::Validation { code, .. } => *code,
            ApiError::RequestTimeout => "request_timeout",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Database(_) | ApiError::Internal => "server_error",
            ApiError::ObjectStorage(_) => "storage_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "rs.errors", error = %err, "Database operation failed");
                Some("An internal database error occurred".to_string())
            }
            ApiError::ObjectStorage(err) => {
                tracing::error!(target: "rs.errors", error = %err, "Object storage operation failed");
                Some("Object storage is unavailable".to_string())
            }
            ApiError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "rs.errors", reason = %reason, "Service unavailable");
                Some("Service temporarily unavailable".to_string())
            }
            ApiError::AuthRequired => Some("Missing Authorization header".to_string()),
            ApiError::InvalidToken(_) => Some("The token could not be verified".to_string()),
            ApiError::TokenExpired => Some("The token has expired".to_string()),
            ApiError::AccountDisabled => Some("This account has been disabled".to_string()),
            ApiError::NotFound { message, .. } => Some((*message).to_string()),
            ApiError::BadRequest { message, .. } | ApiError::Validation { message, .. } => {
                Some(message.clone())
            }
            ApiError::Forbidden { .. } => None,
            ApiError::RequestTimeout => Some("The request took too long".to_string()),
            ApiError::Internal => Some("An internal error occurred".to_string()),
        };

        let status = self.status();
        let envelope = ErrorEnvelope {
            ok: false,
            error: self.code(),
            message,
        };

        let mut response = (status, Json(envelope)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(WWW_AUTHENTICATE_VALUE),
            );
        }

        response
    }
}

/// Convert sqlx errors to `ApiError`
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}
