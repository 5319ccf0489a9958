//! JWT helpers shared by the report service and its test utilities.
//!
//! These are the pieces of token handling that do not depend on a key set:
//! - Size limit checked before any decoding
//! - Header inspection (`kid`, `alg`) without signature verification
//! - `iat` validation with a symmetric leeway
//! - Leeway bounds for configuration
//! - Ed25519 public key decoding from a JWK `x` member
//!
//! # Security
//!
//! Nothing in this module establishes trust. A `kid` read from a header is
//! only a lookup hint into a trusted key set; the token must still be
//! verified against the resolved key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Identity tokens from the provider are around 1KB. Anything larger than
/// this is rejected before base64 decoding or signature work is attempted.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock-skew leeway applied to `exp`, `nbf` and `iat` checks.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Upper bound for a configured leeway (10 minutes).
pub const MAX_LEEWAY: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Failures while inspecting a token before signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Not three dot-separated segments, or the header is not base64url JSON.
    #[error("malformed token")]
    MalformedToken,

    /// Header has no usable `kid`.
    #[error("token header is missing a key id")]
    MissingKid,

    /// `iat` is later than now plus leeway.
    #[error("token issued in the future")]
    IatTooFarInFuture,
}

// =============================================================================
// Header
// =============================================================================

/// The subset of a JOSE header needed to pick a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Key identifier naming the signing key.
    pub kid: String,

    /// Algorithm the issuer claims to have used, if present.
    pub alg: Option<String>,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    kid: Option<serde_json::Value>,
    #[serde(default)]
    alg: Option<String>,
}

/// Decode the header segment of a compact JWT without verifying it.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - not exactly three segments, or the header segment is
///   not base64url-encoded JSON
/// - `MissingKid` - header has no `kid`, or `kid` is empty or not a string
pub fn decode_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: not three segments");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_part.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
            JwtValidationError::MalformedToken
        })?;

    let header: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let kid = header
        .kid
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(TokenHeader {
        kid,
        alg: header.alg,
    })
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate `iat` against the current time with the given leeway.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `leeway` in the future.
pub fn validate_iat(iat: i64, leeway: Duration) -> Result<(), JwtValidationError> {
    validate_iat_at(iat, leeway, chrono::Utc::now().timestamp())
}

/// [`validate_iat`] against an explicit `now`, for boundary tests.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat > now + leeway`.
pub fn validate_iat_at(iat: i64, leeway: Duration, now: i64) -> Result<(), JwtValidationError> {
    // leeway is bounded by MAX_LEEWAY at configuration time
    #[allow(clippy::cast_possible_wrap)]
    let leeway_secs = leeway.as_secs() as i64;
    let max_iat = now.saturating_add(leeway_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Key material
// =============================================================================

/// Decode an Ed25519 public key from a JWK `x` member (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if `x` is not valid base64url.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    fn token_with_header(header: &str) -> String {
        format!("{}.payload.signature", URL_SAFE_NO_PAD.encode(header))
    }

    #[test]
    fn test_default_leeway_is_one_minute() {
        assert_eq!(DEFAULT_LEEWAY, Duration::from_secs(60));
        assert!(DEFAULT_LEEWAY <= MAX_LEEWAY);
    }

    #[test]
    fn test_decode_header_reads_kid_and_alg() {
        let token = token_with_header(r#"{"alg":"RS256","typ":"JWT","kid":"abc123"}"#);

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid, "abc123");
        assert_eq!(header.alg.as_deref(), Some("RS256"));
    }

    #[test]
    fn test_decode_header_without_alg() {
        let token = token_with_header(r#"{"kid":"abc123"}"#);

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid, "abc123");
        assert!(header.alg.is_none());
    }

    #[test]
    fn test_decode_header_missing_kid() {
        let token = token_with_header(r#"{"alg":"RS256","typ":"JWT"}"#);
        assert_eq!(decode_header(&token), Err(JwtValidationError::MissingKid));
    }

    #[test]
    fn test_decode_header_rejects_empty_and_non_string_kid() {
        for header in [
            r#"{"alg":"RS256","kid":""}"#,
            r#"{"alg":"RS256","kid":12345}"#,
            r#"{"alg":"RS256","kid":null}"#,
        ] {
            assert_eq!(
                decode_header(&token_with_header(header)),
                Err(JwtValidationError::MissingKid),
                "header {header} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_header_wrong_segment_count() {
        for token in ["", "single", "only.two", "one.two.three.four"] {
            assert_eq!(
                decode_header(token),
                Err(JwtValidationError::MalformedToken),
                "token {token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_header_undecodable_header() {
        assert_eq!(
            decode_header("!!!invalid!!!.payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            decode_header(&token_with_header("not-json")),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_decode_header_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            decode_header(&oversized),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_decode_header_at_size_limit() {
        let header_b64 = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"key"}"#);
        let remaining = MAX_JWT_SIZE_BYTES - header_b64.len() - 2;
        let payload_len = remaining / 2;
        let token = format!(
            "{}.{}.{}",
            header_b64,
            "a".repeat(payload_len),
            "b".repeat(remaining - payload_len)
        );
        assert_eq!(token.len(), MAX_JWT_SIZE_BYTES);

        assert_eq!(decode_header(&token).unwrap().kid, "key");
    }

    #[test]
    fn test_validate_iat_boundaries() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now - 3600, DEFAULT_LEEWAY, now).is_ok());
        assert!(validate_iat_at(now, DEFAULT_LEEWAY, now).is_ok());
        // now + leeway is the last accepted value
        assert!(validate_iat_at(now + 60, DEFAULT_LEEWAY, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 61, DEFAULT_LEEWAY, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_validate_iat_uses_wall_clock() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_LEEWAY).is_ok());
        assert!(validate_iat(now + 86_400, DEFAULT_LEEWAY).is_err());
    }

    #[test]
    fn test_decode_ed25519_public_key_jwk() {
        let x = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
        assert_eq!(decode_ed25519_public_key_jwk(x).unwrap().len(), 32);
        assert!(decode_ed25519_public_key_jwk("not-valid-base64url!!!").is_err());
    }
}
