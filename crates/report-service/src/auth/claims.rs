//! Identity token claims.
//!
//! The subset of provider claims the service relies on. Every field but
//! `exp` is optional on the wire; `aud`, `iss` and `sub` default to empty so
//! that their absence fails the exact-match checks with a specific error
//! rather than a generic parse failure.
//!
//! `sub` and `email` are redacted in Debug output.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// Claims of a verified identity token.
#[derive(Clone, Deserialize)]
pub struct TokenClaims {
    /// Issuer, `https://securetoken.google.com/<project>`.
    #[serde(default)]
    pub iss: String,

    /// Audience, the provider project id.
    #[serde(default, deserialize_with = "string_or_empty")]
    pub aud: String,

    /// Subject, the provider's stable user id - redacted in Debug output.
    #[serde(default)]
    pub sub: String,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Email address - redacted in Debug output.
    #[serde(default, deserialize_with = "optional_string")]
    pub email: Option<String>,

    /// Sign-in provider, read from `firebase.sign_in_provider`.
    #[serde(default, rename = "firebase", deserialize_with = "sign_in_provider")]
    pub provider: Option<String>,
}

/// Custom Debug implementation that redacts `sub` and `email`.
impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("provider", &self.provider)
            .finish()
    }
}

impl TokenClaims {
    /// The provider's stable user id.
    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.sub
    }
}

/// A string audience, or empty for anything else (arrays included), so the
/// exact audience match rejects it.
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(ToString::to_string).unwrap_or_default())
}

/// A non-empty string, or `None` for any other shape.
fn optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}

/// Read `sign_in_provider` out of the nested `firebase` object, tolerating
/// any shape.
fn sign_in_provider<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .get("sign_in_provider")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}
