//! In-memory stores for tests that do not need Postgres.

use async_trait::async_trait;
use report_service::models::{NewPrincipal, Principal};
use report_service::repositories::{IdentityStore, StoreError};
use report_service::storage::{
    public_url_for, ObjectStore, ObjectStoreError, PresignedUpload,
};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct IdentityState {
    principals: Vec<Principal>,
    insert_attempts: usize,
    forced_duplicates: usize,
}

/// [`IdentityStore`] over a vector, enforcing the same uniqueness rules as
/// the `user_data` table.
///
/// Every call yields to the scheduler first, so concurrent callers
/// interleave between lookup and insert the way they would against a real
/// database.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    state: Mutex<IdentityState>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a principal directly, bypassing provisioning.
    pub async fn seed(&self, new: NewPrincipal) -> Principal {
        let mut state = self.state.lock().await;
        let principal = to_principal(state.principals.len() as i64 + 1, new);
        state.principals.push(principal.clone());
        principal
    }

    /// Make the next `count` inserts fail with `Duplicate` without storing.
    pub async fn fail_next_inserts(&self, count: usize) {
        self.state.lock().await.forced_duplicates = count;
    }

    /// Mark the principal for `external_id` as disabled.
    pub async fn deactivate(&self, external_id: &str) {
        let mut state = self.state.lock().await;
        for principal in state.principals.iter_mut() {
            if principal.external_id == external_id {
                principal.is_active = false;
            }
        }
    }

    /// Number of stored principals.
    pub async fn len(&self) -> usize {
        self.state.lock().await.principals.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `insert_principal` calls, successful or not.
    pub async fn insert_attempts(&self) -> usize {
        self.state.lock().await.insert_attempts
    }

    /// Every stored principal, in insertion order.
    pub async fn principals(&self) -> Vec<Principal> {
        self.state.lock().await.principals.clone()
    }
}

fn to_principal(id: i64, new: NewPrincipal) -> Principal {
    Principal {
        id,
        external_id: new.external_id,
        custom_id: new.custom_id,
        email: new.email,
        role: new.role,
        is_active: true,
        session: None,
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().await;
        Ok(state
            .principals
            .iter()
            .find(|p| p.external_id == external_id)
            .cloned())
    }

    async fn insert_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.insert_attempts += 1;

        if state.forced_duplicates > 0 {
            state.forced_duplicates -= 1;
            return Err(StoreError::Duplicate);
        }

        let taken = state
            .principals
            .iter()
            .any(|p| p.external_id == new.external_id || p.custom_id == new.custom_id);
        if taken {
            return Err(StoreError::Duplicate);
        }

        let principal = to_principal(state.principals.len() as i64 + 1, new.clone());
        state.principals.push(principal.clone());
        Ok(principal)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.principals.iter().find(|p| p.id == id).cloned())
    }
}

/// [`ObjectStore`] that records calls instead of reaching a bucket.
pub struct RecordingObjectStore {
    cdn_domain: String,
    presigned: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: bool,
}

impl RecordingObjectStore {
    /// Store resolving public URLs against `cdn.test`.
    pub fn new() -> Self {
        Self {
            cdn_domain: "cdn.test".to_string(),
            presigned: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_deletes: false,
        }
    }

    /// Store whose deletes always fail.
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::new()
        }
    }

    /// `(key, content_type)` of every presign, in order.
    pub async fn presigned(&self) -> Vec<(String, String)> {
        self.presigned.lock().await.clone()
    }

    /// Keys passed to `delete_object`, in order, including failed ones.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

impl Default for RecordingObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<PresignedUpload, ObjectStoreError> {
        self.presigned
            .lock()
            .await
            .push((key.to_string(), content_type.to_string()));

        Ok(PresignedUpload {
            url: format!("https://uploads.test/{key}?signature=test"),
            method: "PUT",
            headers: BTreeMap::from([("Content-Type".to_string(), content_type.to_string())]),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.deleted.lock().await.push(key.to_string());
        if self.fail_deletes {
            return Err(ObjectStoreError::Request("delete refused".to_string()));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        public_url_for(key, Some(&self.cdn_domain), None)
    }
}
