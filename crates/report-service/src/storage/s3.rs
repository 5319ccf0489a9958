//! S3-backed [`ObjectStore`].

use crate::storage::{public_url_for, ObjectStore, ObjectStoreError, PresignedUpload};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::instrument;

/// Presigns uploads to and deletes objects from one bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    cdn_domain: Option<String>,
    presign_ttl: Duration,
}

impl S3ObjectStore {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        region: impl Into<String>,
        cdn_domain: Option<String>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            region: region.into(),
            cdn_domain,
            presign_ttl,
        }
    }

    /// Build a client for `region` from the default credential chain.
    pub async fn from_env(
        bucket: impl Into<String>,
        region: impl Into<String>,
        cdn_domain: Option<String>,
        presign_ttl: Duration,
    ) -> Self {
        let region = region.into();
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .load()
            .await;
        let client = aws_sdk_s3::Client::new(&aws_config);
        Self::new(client, bucket, region, cdn_domain, presign_ttl)
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip_all, name = "rs.storage.presign_put")]
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<PresignedUpload, ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| ObjectStoreError::Presign(e.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| ObjectStoreError::Presign(e.to_string()))?;

        tracing::debug!(target: "rs.storage", key = %key, "Presigned upload");

        Ok(PresignedUpload {
            url: request.uri().to_string(),
            method: "PUT",
            headers: BTreeMap::from([("Content-Type".to_string(), content_type.to_string())]),
        })
    }

    #[instrument(skip_all, name = "rs.storage.delete_object")]
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Request(e.to_string()))?;

        tracing::info!(target: "rs.storage", key = %key, "Object deleted");
        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        public_url_for(
            key,
            self.cdn_domain.as_deref(),
            Some((&self.bucket, &self.region)),
        )
    }
}
