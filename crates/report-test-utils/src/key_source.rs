//! Mock signing key source
//!
//! Wraps a wiremock server that serves a JWKS document at [`JWKS_PATH`].

use crate::crypto_fixtures::{jwks_document, TestKey};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/robot/v1/metadata/jwk/securetoken@system.gserviceaccount.com";

/// A key source backed by a local HTTP server.
///
/// # Example
/// ```rust,ignore
/// let source = MockKeySource::start().await;
/// source.publish(&[TestKey::Rsa1]).await;
/// let cache = KeySetCache::new(source.url());
/// ```
pub struct MockKeySource {
    server: MockServer,
}

impl MockKeySource {
    /// Start a server with nothing mounted. Requests get 404 until keys are
    /// published.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a server already publishing `keys`.
    pub async fn with_keys(keys: &[TestKey]) -> Self {
        let source = Self::start().await;
        source.publish(keys).await;
        source
    }

    /// Full URL of the key set endpoint.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve `keys` on every request.
    pub async fn publish(&self, keys: &[TestKey]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` and verify on drop that exactly `times` requests arrived.
    pub async fn publish_expecting(&self, keys: &[TestKey], times: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Answer every request with `status`.
    pub async fn fail_with(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer every request with a body that is not a key set.
    pub async fn serve_garbage(&self) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted response.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}
