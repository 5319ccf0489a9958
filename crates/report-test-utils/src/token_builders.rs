//! Identity token builders for testing
//!
//! Builds provider-shaped claims and signs them with a fixture key.

use crate::crypto_fixtures::{ed25519_pkcs8, rsa_private_pem, TestKey};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

/// Provider project id the test service is configured for.
pub const TEST_PROJECT_ID: &str = "traceq-test";

/// Issuer of tokens for [`TEST_PROJECT_ID`].
pub fn test_issuer() -> String {
    format!("https://securetoken.google.com/{TEST_PROJECT_ID}")
}

/// Builder for signed identity tokens.
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    sub: String,
    aud: String,
    iss: String,
    iat: Option<i64>,
    nbf: Option<i64>,
    exp: i64,
    email: Option<String>,
    provider: Option<String>,
    key: TestKey,
    kid: Option<String>,
}

impl TestTokenBuilder {
    /// A valid token for `test-user`, issued now, expiring in an hour,
    /// signed with [`TestKey::Rsa1`].
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: "test-user".to_string(),
            aud: TEST_PROJECT_ID.to_string(),
            iss: test_issuer(),
            iat: Some(now),
            nbf: None,
            exp: now + 3600,
            email: None,
            provider: Some("password".to_string()),
            key: TestKey::Rsa1,
            kid: None,
        }
    }

    /// Set the subject (provider user id).
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_audience(mut self, aud: &str) -> Self {
        self.aud = aud.to_string();
        self
    }

    pub fn with_issuer(mut self, iss: &str) -> Self {
        self.iss = iss.to_string();
        self
    }

    /// Expire `seconds` from now. Negative values produce expired tokens.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = chrono::Utc::now().timestamp() + seconds;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    pub fn not_before(mut self, timestamp: i64) -> Self {
        self.nbf = Some(timestamp);
        self
    }

    /// Sign with `key`. The header `kid` follows the key unless overridden.
    pub fn signed_with(mut self, key: TestKey) -> Self {
        self.key = key;
        self
    }

    /// Override the header `kid`.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// The claims as JSON.
    pub fn build(&self) -> serde_json::Value {
        let mut claims = serde_json::json!({
            "iss": self.iss,
            "aud": self.aud,
            "sub": self.sub,
            "exp": self.exp,
        });
        if let Some(iat) = self.iat {
            claims["iat"] = iat.into();
        }
        if let Some(nbf) = self.nbf {
            claims["nbf"] = nbf.into();
        }
        if let Some(email) = &self.email {
            claims["email"] = email.clone().into();
        }
        if let Some(provider) = &self.provider {
            claims["firebase"] = serde_json::json!({ "sign_in_provider": provider });
        }
        claims
    }

    /// Sign the claims into a compact JWT.
    pub fn sign(&self) -> String {
        let (algorithm, encoding_key) = match self.key {
            TestKey::Rsa1 | TestKey::Rsa2 => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(rsa_private_pem(self.key).as_bytes())
                    .expect("fixture PEM is valid"),
            ),
            TestKey::Ed25519 { seed } => {
                (Algorithm::EdDSA, EncodingKey::from_ed_der(&ed25519_pkcs8(seed)))
            }
        };

        let mut header = Header::new(algorithm);
        header.kid = Some(self.kid.clone().unwrap_or_else(|| self.key.kid()));

        encode(&header, &self.build(), &encoding_key).expect("fixture token signs")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
