//! Object storage for uploaded photos.
//!
//! Clients upload directly to the bucket with presigned `PUT` URLs; the
//! service only signs, deletes, and resolves public URLs. [`ObjectStore`]
//! is the seam handlers depend on, implemented by [`s3::S3ObjectStore`] and,
//! when no bucket is configured, by [`UnconfiguredObjectStore`].

pub mod s3;

use crate::errors::ApiError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object storage is not configured")]
    NotConfigured,

    #[error("presign failed: {0}")]
    Presign(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<ObjectStoreError> for ApiError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotConfigured => {
                ApiError::ServiceUnavailable("object storage is not configured".to_string())
            }
            other => ApiError::ObjectStorage(other.to_string()),
        }
    }
}

/// A presigned upload the client performs itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub method: &'static str,
    /// Headers the client must send with the upload.
    pub headers: BTreeMap<String, String>,
}

/// Operations the service needs from an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Sign a `PUT` of `key` with the given content type.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<PresignedUpload, ObjectStoreError>;

    /// Delete `key`. Deleting a missing object succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Public URL for `key`, if one can be formed.
    fn public_url(&self, key: &str) -> Option<String>;
}

/// Stand-in used when no bucket is configured. Writes fail with
/// `NotConfigured`; public URLs still resolve through the CDN domain.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredObjectStore {
    cdn_domain: Option<String>,
}

impl UnconfiguredObjectStore {
    #[must_use]
    pub fn new(cdn_domain: Option<String>) -> Self {
        Self { cdn_domain }
    }
}

#[async_trait]
impl ObjectStore for UnconfiguredObjectStore {
    async fn presign_put(
        &self,
        _key: &str,
        _content_type: &str,
    ) -> Result<PresignedUpload, ObjectStoreError> {
        Err(ObjectStoreError::NotConfigured)
    }

    async fn delete_object(&self, _key: &str) -> Result<(), ObjectStoreError> {
        Err(ObjectStoreError::NotConfigured)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        public_url_for(key, self.cdn_domain.as_deref(), None)
    }
}

/// Resolve a stored photo reference to a public URL.
///
/// Absolute URLs pass through. Keys resolve against the CDN domain when one
/// is set, otherwise against the bucket's virtual-hosted S3 endpoint given
/// as `(bucket, region)`.
#[must_use]
pub fn public_url_for(
    key: &str,
    cdn_domain: Option<&str>,
    bucket: Option<(&str, &str)>,
) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    if key.starts_with("http://") || key.starts_with("https://") {
        return Some(key.to_string());
    }

    let key = key.trim_start_matches('/');

    if let Some(domain) = cdn_domain.map(str::trim).filter(|d| !d.is_empty()) {
        let host = domain
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        return Some(format!("https://{host}/{key}"));
    }

    bucket.map(|(bucket, region)| format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"))
}

/// Content types accepted for photo uploads, with the file extension used
/// in generated keys.
pub const ALLOWED_IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
];

/// Extension for an allowed image content type.
#[must_use]
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    let content_type = content_type.trim().to_ascii_lowercase();
    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == content_type)
        .map(|(_, ext)| *ext)
}
