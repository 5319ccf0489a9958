//! Authentication gateway.
//!
//! Every protected handler starts with [`AuthGateway::require_authentication`]:
//! bearer extraction, token verification, provisioning, and the active-flag
//! check, in that order. [`From<AuthError> for ApiError`] is the one place
//! internal failures become public codes.

use crate::auth::provisioner::{IdentityProvisioner, ProvisionError};
use crate::auth::verifier::{TokenError, TokenVerifier};
use crate::errors::ApiError;
use crate::models::{Principal, SessionIdentity};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

const BEARER_SCHEME: &str = "bearer";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token")]
    AuthRequired,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("account disabled")]
    AccountDisabled,

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthRequired => ApiError::AuthRequired,
            AuthError::AccountDisabled => ApiError::AccountDisabled,
            AuthError::Token(TokenError::TokenExpired) => ApiError::TokenExpired,
            AuthError::Token(TokenError::KeySourceUnavailable) => {
                tracing::error!(
                    target: "rs.auth.gateway",
                    "Signing keys unavailable, cannot authenticate"
                );
                ApiError::Internal
            }
            AuthError::Token(e) => ApiError::InvalidToken(e.to_string()),
            AuthError::Provision(e) => {
                tracing::error!(target: "rs.auth.gateway", error = %e, "Provisioning failed");
                ApiError::Internal
            }
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively and must be followed by
/// whitespace. Returns `None` for a missing header, another scheme, or an
/// empty token.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let scheme = value.get(..BEARER_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let rest = value.get(BEARER_SCHEME.len()..)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Verifies the caller and resolves the principal.
pub struct AuthGateway {
    verifier: Arc<TokenVerifier>,
    provisioner: Arc<IdentityProvisioner>,
}

impl AuthGateway {
    pub fn new(verifier: Arc<TokenVerifier>, provisioner: Arc<IdentityProvisioner>) -> Self {
        Self {
            verifier,
            provisioner,
        }
    }

    /// Authenticate the request carrying `headers`.
    ///
    /// # Errors
    ///
    /// - `AuthRequired` when there is no usable bearer token
    /// - `Token` when verification fails
    /// - `Provision` when the identity store fails
    /// - `AccountDisabled` when the principal is inactive, admin or not
    #[instrument(skip_all, name = "rs.auth.gateway.require_authentication")]
    pub async fn require_authentication(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = bearer_token(headers).ok_or_else(|| {
            tracing::debug!(target: "rs.auth.gateway", "Missing or malformed Authorization header");
            AuthError::AuthRequired
        })?;

        let claims = self.verifier.verify(token).await?;

        let mut principal = self
            .provisioner
            .resolve(claims.external_id(), claims.email.as_deref())
            .await?;

        if !principal.is_active {
            tracing::info!(
                target: "rs.auth.gateway",
                custom_id = %principal.custom_id,
                "Rejected disabled account"
            );
            return Err(AuthError::AccountDisabled);
        }

        principal.session = Some(SessionIdentity {
            external_id: claims.sub,
            email: claims.email,
            provider: claims.provider,
        });

        Ok(principal)
    }
}
