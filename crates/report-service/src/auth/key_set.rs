//! Signing key set cache for identity token verification.
//!
//! Keys are fetched from the identity provider's JWKS endpoint and kept at
//! two tiers:
//!
//! 1. In memory, shared by every request in this process
//! 2. On disk, as `{"fetched_at": <unix seconds>, "keys": [...]}`, shared by
//!    every process pointed at the same path
//!
//! A set younger than the TTL (12 hours) is served without touching the
//! network. Older sets trigger a fetch; if the fetch fails the stale set is
//! still served, and only when no set exists at all does lookup fail.
//!
//! # Concurrency
//!
//! No lock is held across a network fetch. Concurrent refreshes may each
//! fetch; the last completed one wins in memory and on disk. The file is
//! replaced by writing a uniquely named sibling and renaming it over the
//! target, so readers only ever see a complete document.

use crate::observability::metrics::{record_jwks_cache, record_jwks_fetch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::instrument;

/// Key sets younger than this are served without a fetch (12 hours).
pub const KEY_SET_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default timeout for one fetch of the key source.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" for the provider's keys, "OKP" for Ed25519).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm the key is meant for (e.g. "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key use (should be "sig").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// OKP curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// OKP public key (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
}

/// An immutable snapshot of the provider's signing keys.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: HashMap<String, Jwk>,
    fetched_at: DateTime<Utc>,
}

impl KeySet {
    /// Build a set from keys fetched at `fetched_at`. Later duplicates of a
    /// `kid` replace earlier ones.
    pub fn new(keys: impl IntoIterator<Item = Jwk>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            keys: keys.into_iter().map(|key| (key.kid.clone(), key)).collect(),
            fetched_at,
        }
    }

    /// Look up a key by `kid`.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Whether the set is younger than `ttl` at `now`. A `fetched_at` in the
    /// future counts as fresh.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }

    /// The keys as an unordered list.
    pub fn keys(&self) -> impl Iterator<Item = &Jwk> {
        self.keys.values()
    }
}

/// On-disk envelope.
#[derive(Serialize, Deserialize)]
struct PersistedKeySet {
    fetched_at: i64,
    keys: Vec<Jwk>,
}

/// Raw key source document. Entries are parsed one by one so a single
/// unusable key does not discard the rest.
#[derive(Deserialize)]
struct RawKeySetDocument {
    keys: Vec<serde_json::Value>,
}

/// Key set lookup failed and no set, fresh or stale, is available.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeySetError {
    #[error("signing key source unavailable")]
    KeySourceUnavailable,
}

/// Why a fetch failed. Logged, never surfaced past the cache.
#[derive(Debug, Error)]
enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("key source returned HTTP {0}")]
    Status(u16),

    #[error("malformed key set: {0}")]
    Parse(String),
}

impl FetchError {
    fn outcome(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport_error",
            FetchError::Status(_) => "http_error",
            FetchError::Parse(_) => "parse_error",
        }
    }
}

/// Two-tier cache of the provider's signing keys.
pub struct KeySetCache {
    /// URL of the JWKS endpoint.
    source_url: String,

    /// HTTP client for fetching keys.
    http_client: reqwest::Client,

    /// Persisted set location, if persistence is enabled.
    cache_path: Option<PathBuf>,

    /// Freshness window.
    ttl: Duration,

    /// Most recent set seen by this process.
    current: RwLock<Option<Arc<KeySet>>>,
}

impl KeySetCache {
    /// Create a cache for `source_url` with no persistence and default TTL
    /// and fetch timeout.
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            http_client: build_http_client(DEFAULT_FETCH_TIMEOUT),
            cache_path: None,
            ttl: KEY_SET_TTL,
            current: RwLock::new(None),
        }
    }

    /// Persist fetched sets at `path` and read them back on a cold start.
    #[must_use]
    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.http_client = build_http_client(timeout);
        self
    }

    /// Return the current key set.
    ///
    /// Served from memory, then from the persisted file, while younger than
    /// the TTL. Otherwise the source is fetched; on fetch failure the newest
    /// stale set is returned instead.
    ///
    /// # Errors
    ///
    /// Returns `KeySourceUnavailable` when the fetch fails and no set has
    /// ever been obtained.
    #[instrument(skip_all, name = "rs.auth.keys.lookup")]
    pub async fn key_set(&self) -> Result<Arc<KeySet>, KeySetError> {
        let now = Utc::now();

        let in_memory = self.current.read().await.clone();
        if let Some(set) = in_memory.as_ref().filter(|s| s.is_fresh_at(now, self.ttl)) {
            record_jwks_cache("memory");
            return Ok(Arc::clone(set));
        }

        // Another process may already have refreshed the shared file.
        let persisted = self.load_persisted().await;
        if let Some(set) = persisted.as_ref().filter(|s| s.is_fresh_at(now, self.ttl)) {
            tracing::debug!(
                target: "rs.auth.keys",
                key_count = set.len(),
                "Key set loaded from persisted cache"
            );
            record_jwks_cache("file");
            self.install(Arc::clone(set)).await;
            return Ok(Arc::clone(set));
        }

        self.refresh(newest(in_memory, persisted)).await
    }

    /// Fetch the source regardless of freshness.
    ///
    /// Used when a token names a `kid` the current set does not contain.
    /// Falls back to the existing set if the fetch fails.
    ///
    /// # Errors
    ///
    /// Returns `KeySourceUnavailable` when the fetch fails and no set has
    /// ever been obtained.
    #[instrument(skip_all, name = "rs.auth.keys.force_refresh")]
    pub async fn force_refresh(&self) -> Result<Arc<KeySet>, KeySetError> {
        let in_memory = self.current.read().await.clone();
        let fallback = match in_memory {
            Some(set) => Some(set),
            None => self.load_persisted().await,
        };
        self.refresh(fallback).await
    }

    async fn refresh(&self, fallback: Option<Arc<KeySet>>) -> Result<Arc<KeySet>, KeySetError> {
        match self.fetch().await {
            Ok(set) => {
                let set = Arc::new(set);
                if let Err(e) = self.persist(&set).await {
                    tracing::warn!(
                        target: "rs.auth.keys",
                        error = %e,
                        "Failed to persist key set; continuing with in-memory copy"
                    );
                }
                record_jwks_cache("fetched");
                self.install(Arc::clone(&set)).await;
                Ok(set)
            }
            Err(e) => match fallback {
                Some(stale) => {
                    tracing::warn!(
                        target: "rs.auth.keys",
                        error = %e,
                        fetched_at = %stale.fetched_at(),
                        "Key source fetch failed; serving stale key set"
                    );
                    record_jwks_cache("stale");
                    self.install(Arc::clone(&stale)).await;
                    Ok(stale)
                }
                None => {
                    tracing::error!(
                        target: "rs.auth.keys",
                        error = %e,
                        "Key source fetch failed and no cached key set exists"
                    );
                    record_jwks_cache("unavailable");
                    Err(KeySetError::KeySourceUnavailable)
                }
            },
        }
    }

    async fn install(&self, set: Arc<KeySet>) {
        let mut current = self.current.write().await;
        // Never replace a newer set with an older one.
        let keep_existing = current
            .as_ref()
            .is_some_and(|existing| existing.fetched_at() > set.fetched_at());
        if !keep_existing {
            *current = Some(set);
        }
    }

    /// Fetch and parse the key source.
    async fn fetch(&self) -> Result<KeySet, FetchError> {
        tracing::debug!(target: "rs.auth.keys", url = %self.source_url, "Fetching signing keys");
        let start = Instant::now();
        let result = self.fetch_inner().await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        record_jwks_fetch(outcome, start.elapsed());

        if let Ok(set) = &result {
            tracing::info!(
                target: "rs.auth.keys",
                key_count = set.len(),
                "Signing key set refreshed"
            );
        }
        result
    }

    async fn fetch_inner(&self) -> Result<KeySet, FetchError> {
        let response = self
            .http_client
            .get(&self.source_url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        parse_key_set_document(&body, Utc::now())
    }

    /// Read the persisted set. Missing or unreadable files yield `None`.
    async fn load_persisted(&self) -> Option<Arc<KeySet>> {
        let path = self.cache_path.as_ref()?;

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(target: "rs.auth.keys", error = %e, "Failed to read persisted key set");
                return None;
            }
        };

        match decode_persisted(&bytes) {
            Some(set) => Some(Arc::new(set)),
            None => {
                tracing::warn!(target: "rs.auth.keys", "Ignoring malformed persisted key set");
                None
            }
        }
    }

    /// Atomically replace the persisted set.
    async fn persist(&self, set: &KeySet) -> std::io::Result<()> {
        let Some(path) = self.cache_path.as_ref() else {
            return Ok(());
        };

        let envelope = PersistedKeySet {
            fetched_at: set.fetched_at().timestamp(),
            keys: set.keys().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if write_result.is_err() {
            // Best effort; the original error is what matters.
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        write_result
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "rs.auth.keys", error = %e, "Failed to build HTTP client with custom config, using defaults");
            reqwest::Client::new()
        })
}

fn newest(a: Option<Arc<KeySet>>, b: Option<Arc<KeySet>>) -> Option<Arc<KeySet>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.fetched_at() > a.fetched_at() { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Parse a key source response body.
fn parse_key_set_document(body: &[u8], fetched_at: DateTime<Utc>) -> Result<KeySet, FetchError> {
    let document: RawKeySetDocument =
        serde_json::from_slice(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let keys: Vec<Jwk> = document
        .keys
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) if !jwk.kid.is_empty() => Some(jwk),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(target: "rs.auth.keys", error = %e, "Skipping unusable key in key set");
                None
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(FetchError::Parse("key set contains no usable keys".to_string()));
    }

    Ok(KeySet::new(keys, fetched_at))
}

fn decode_persisted(bytes: &[u8]) -> Option<KeySet> {
    let envelope: PersistedKeySet = serde_json::from_slice(bytes).ok()?;
    let fetched_at = DateTime::<Utc>::from_timestamp(envelope.fetched_at, 0)?;
    let set = KeySet::new(envelope.keys, fetched_at);
    (!set.is_empty()).then_some(set)
}
