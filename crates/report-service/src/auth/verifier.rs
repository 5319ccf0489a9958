//! Identity token verification.
//!
//! Verifies provider-issued tokens against the signing key set:
//!
//! 1. Size check and header decode, before any signature work
//! 2. Key lookup by `kid`, with one forced refresh on a miss
//! 3. Header `alg` must name the algorithm the key dictates, then the
//!    signature is checked with that algorithm
//! 4. `exp`, `nbf` and `iat` with the configured leeway
//! 5. Exact `aud` match, then exact `iss` match, then non-empty `sub`
//!
//! # Security
//!
//! - The algorithm comes from the key, never from the token header
//! - RSA keys verify RS256 only; OKP keys verify EdDSA only
//! - Rejections are logged at debug with the reason; tokens are never logged

use crate::auth::claims::TokenClaims;
use crate::auth::key_set::{Jwk, KeySetCache};
use crate::observability::metrics::record_token_validation;
use common::jwt::{decode_ed25519_public_key_jwk, decode_header, validate_iat, JwtValidationError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Issuer prefix; the project id completes it.
pub const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// The issuer tokens for `project_id` must carry.
#[must_use]
pub fn expected_issuer(project_id: &str) -> String {
    format!("{ISSUER_PREFIX}{project_id}")
}

/// Why a token was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    MalformedToken,

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("token signed by an unknown key")]
    UnknownSigningKey,

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not yet valid")]
    TokenNotYetValid,

    #[error("token audience does not match")]
    InvalidAudience,

    #[error("token issuer does not match")]
    InvalidIssuer,

    #[error("token has no subject")]
    MissingSubject,

    #[error("signing key source unavailable")]
    KeySourceUnavailable,
}

impl TokenError {
    /// Metric and log label for this rejection.
    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            TokenError::MalformedToken => "malformed_token",
            TokenError::MissingKeyId => "missing_key_id",
            TokenError::UnknownSigningKey => "unknown_signing_key",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::TokenExpired => "token_expired",
            TokenError::TokenNotYetValid => "token_not_yet_valid",
            TokenError::InvalidAudience => "invalid_audience",
            TokenError::InvalidIssuer => "invalid_issuer",
            TokenError::MissingSubject => "missing_subject",
            TokenError::KeySourceUnavailable => "key_source_unavailable",
        }
    }
}

impl From<JwtValidationError> for TokenError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                TokenError::MalformedToken
            }
            JwtValidationError::MissingKid => TokenError::MissingKeyId,
            JwtValidationError::IatTooFarInFuture => TokenError::TokenNotYetValid,
        }
    }
}

/// Verifies identity tokens for one provider project.
pub struct TokenVerifier {
    /// Signing key source.
    key_cache: Arc<KeySetCache>,

    /// Expected `aud`.
    audience: String,

    /// Expected `iss`.
    issuer: String,

    /// Clock-skew leeway for time claims.
    leeway: Duration,
}

impl TokenVerifier {
    /// Create a verifier for `project_id`.
    pub fn new(key_cache: Arc<KeySetCache>, project_id: &str, leeway: Duration) -> Self {
        Self {
            key_cache,
            audience: project_id.to_string(),
            issuer: expected_issuer(project_id),
            leeway,
        }
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a `TokenError`.
    #[instrument(skip_all, name = "rs.auth.token.verify")]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let result = self.verify_inner(token).await;

        match &result {
            Ok(_) => {
                tracing::debug!(target: "rs.auth.token", "Token verified");
                record_token_validation("success");
            }
            Err(e) => {
                tracing::debug!(target: "rs.auth.token", reason = e.as_label(), "Token rejected");
                record_token_validation(e.as_label());
            }
        }

        result
    }

    async fn verify_inner(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let header = decode_header(token)?;

        let jwk = self.resolve_key(&header.kid).await?;

        ensure_header_algorithm(header.alg.as_deref(), &jwk)?;

        let claims = verify_signature(token, &jwk, self.leeway)?;

        if let Some(iat) = claims.iat {
            validate_iat(iat, self.leeway)?;
        }

        if claims.aud != self.audience {
            return Err(TokenError::InvalidAudience);
        }

        if claims.iss != self.issuer {
            return Err(TokenError::InvalidIssuer);
        }

        if claims.sub.is_empty() {
            return Err(TokenError::MissingSubject);
        }

        Ok(claims)
    }

    /// Find the key named `kid`, refreshing the set once if it is missing.
    async fn resolve_key(&self, kid: &str) -> Result<Jwk, TokenError> {
        let key_set = self
            .key_cache
            .key_set()
            .await
            .map_err(|_| TokenError::KeySourceUnavailable)?;

        if let Some(jwk) = key_set.get(kid) {
            return Ok(jwk.clone());
        }

        tracing::debug!(target: "rs.auth.token", kid = %kid, "Key id not in current set; forcing refresh");

        let key_set = self
            .key_cache
            .force_refresh()
            .await
            .map_err(|_| TokenError::KeySourceUnavailable)?;

        key_set.get(kid).cloned().ok_or_else(|| {
            tracing::warn!(target: "rs.auth.token", kid = %kid, "Key id not found after refresh");
            TokenError::UnknownSigningKey
        })
    }
}

/// The algorithm a key of this type verifies, by `kty`.
fn key_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match jwk.kty.as_str() {
        "RSA" => Some(Algorithm::RS256),
        "OKP" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Reject a token whose header `alg` is absent or names a different
/// algorithm than the selected key verifies.
fn ensure_header_algorithm(header_alg: Option<&str>, jwk: &Jwk) -> Result<(), TokenError> {
    let expected = key_algorithm(jwk);
    let claimed = header_alg.and_then(|alg| alg.parse::<Algorithm>().ok());

    if expected.is_some() && claimed == expected {
        return Ok(());
    }

    tracing::debug!(
        target: "rs.auth.token",
        kid = %jwk.kid,
        kty = %jwk.kty,
        header_alg = header_alg.unwrap_or("none"),
        "Header algorithm does not match key"
    );
    Err(TokenError::SignatureInvalid)
}

/// Build the decoding key and the only algorithm it may verify.
fn decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), TokenError> {
    match jwk.kty.as_str() {
        "RSA" => {
            if let Some(alg) = jwk.alg.as_deref().filter(|a| *a != "RS256") {
                tracing::warn!(target: "rs.auth.token", alg = %alg, "Unexpected RSA key algorithm");
                return Err(TokenError::SignatureInvalid);
            }
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                tracing::error!(target: "rs.auth.token", kid = %jwk.kid, "RSA key missing n or e");
                return Err(TokenError::SignatureInvalid);
            };
            let key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
                tracing::error!(target: "rs.auth.token", error = %e, "Invalid RSA key components");
                TokenError::SignatureInvalid
            })?;
            Ok((key, Algorithm::RS256))
        }
        "OKP" => {
            if jwk.crv.as_deref().is_some_and(|crv| crv != "Ed25519")
                || jwk.alg.as_deref().is_some_and(|alg| alg != "EdDSA")
            {
                tracing::warn!(target: "rs.auth.token", kid = %jwk.kid, "Unexpected OKP key parameters");
                return Err(TokenError::SignatureInvalid);
            }
            let x = jwk.x.as_deref().ok_or_else(|| {
                tracing::error!(target: "rs.auth.token", kid = %jwk.kid, "OKP key missing x");
                TokenError::SignatureInvalid
            })?;
            let public_key = decode_ed25519_public_key_jwk(x).map_err(|e| {
                tracing::error!(target: "rs.auth.token", error = %e, "Invalid public key encoding");
                TokenError::SignatureInvalid
            })?;
            Ok((DecodingKey::from_ed_der(&public_key), Algorithm::EdDSA))
        }
        other => {
            tracing::warn!(target: "rs.auth.token", kty = %other, "Unsupported key type");
            Err(TokenError::SignatureInvalid)
        }
    }
}

/// Verify the signature and time claims, returning the decoded claims.
fn verify_signature(token: &str, jwk: &Jwk, leeway: Duration) -> Result<TokenClaims, TokenError> {
    let (key, algorithm) = decoding_key(jwk)?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = leeway.as_secs();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    // aud and iss are compared exactly after decoding
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    decode::<TokenClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| map_decode_error(e.kind()))
}

fn map_decode_error(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::TokenExpired,
        ErrorKind::ImmatureSignature => TokenError::TokenNotYetValid,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::RsaFailedSigning
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::Crypto(_) => TokenError::SignatureInvalid,
        ErrorKind::InvalidAudience => TokenError::InvalidAudience,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::InvalidSubject => TokenError::MissingSubject,
        _ => TokenError::MalformedToken,
    }
}
