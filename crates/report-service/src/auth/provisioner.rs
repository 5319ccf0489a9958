//! First-sight provisioning of principals.
//!
//! A verified external identity resolves to exactly one `user_data` row.
//! Unknown subjects get a new row with a generated display id and a role
//! taken from the admin allow-list. Role is decided once, at creation.
//!
//! Concurrent first logins for one subject race on the UNIQUE constraint
//! over `firebase_uid`; the losers re-read the winner's row.

use crate::ids::{principal_custom_id, RandomError};
use crate::models::{NewPrincipal, Principal, Role};
use crate::observability::metrics::record_principal_provisioned;
use crate::repositories::{IdentityStore, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Insert attempts before giving up. A retry only happens when the
/// generated display id collided with another principal's.
const MAX_INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to generate display id")]
    Random(#[from] RandomError),

    /// Every insert hit a uniqueness violation and no row for the subject
    /// could be read back.
    #[error("could not provision principal: every insert collided")]
    Inconsistent,
}

/// Lower-cased set of administrator emails.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: HashSet<String>,
}

impl AdminAllowList {
    /// Parse a comma-separated list. Entries are trimmed and lower-cased;
    /// blanks are dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self::from_entries(raw.split(','))
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        !self.emails.is_empty() && self.emails.contains(&email.trim().to_lowercase())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Role a new principal with `email` receives.
    #[must_use]
    pub fn role_for(&self, email: Option<&str>) -> Role {
        match email {
            Some(email) if self.contains(email) => Role::Admin,
            _ => Role::User,
        }
    }
}

/// Resolves verified identities to stored principals.
pub struct IdentityProvisioner {
    store: Arc<dyn IdentityStore>,
    admins: AdminAllowList,
}

impl IdentityProvisioner {
    pub fn new(store: Arc<dyn IdentityStore>, admins: AdminAllowList) -> Self {
        Self { store, admins }
    }

    /// Return the principal bound to `external_id`, creating it if needed.
    ///
    /// An existing principal is returned unchanged, whatever the allow-list
    /// now says about its email.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError` if the store fails, no display id can be
    /// generated, or every insert collides without a readable row.
    #[instrument(skip_all, name = "rs.auth.provision.resolve")]
    pub async fn resolve(
        &self,
        external_id: &str,
        email: Option<&str>,
    ) -> Result<Principal, ProvisionError> {
        if let Some(existing) = self.store.find_by_external_id(external_id).await? {
            return Ok(existing);
        }

        let role = self.admins.role_for(email);

        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            let new = NewPrincipal {
                external_id: external_id.to_string(),
                custom_id: principal_custom_id()?,
                email: email.map(str::to_string),
                role,
            };

            match self.store.insert_principal(&new).await {
                Ok(principal) => {
                    tracing::info!(
                        target: "rs.auth.provision",
                        custom_id = %principal.custom_id,
                        role = role.as_str(),
                        "Provisioned new principal"
                    );
                    record_principal_provisioned(role.as_str());
                    return Ok(principal);
                }
                Err(StoreError::Duplicate) => {
                    // Lost a race for the subject, or the display id collided.
                    if let Some(existing) = self.store.find_by_external_id(external_id).await? {
                        tracing::debug!(
                            target: "rs.auth.provision",
                            attempt,
                            "Concurrent provisioning detected, using existing principal"
                        );
                        return Ok(existing);
                    }
                    tracing::warn!(
                        target: "rs.auth.provision",
                        attempt,
                        "Display id collision, retrying with a new id"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProvisionError::Inconsistent)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_parse_normalizes() {
        let list = AdminAllowList::parse(" Admin@Example.edu, ,ops@example.edu,,");

        assert!(list.contains("admin@example.edu"));
        assert!(list.contains("ADMIN@EXAMPLE.EDU"));
        assert!(list.contains("Ops@Example.Edu"));
        assert!(!list.contains("someone@example.edu"));
        assert!(!list.contains(""));
    }

    #[test]
    fn test_empty_allow_list_grants_nobody() {
        let list = AdminAllowList::parse("");

        assert!(list.is_empty());
        assert_eq!(list.role_for(Some("admin@example.edu")), Role::User);
        assert_eq!(list.role_for(None), Role::User);
    }

    #[test]
    fn test_role_for() {
        let list = AdminAllowList::from_entries(["boss@example.edu"]);

        assert_eq!(list.role_for(Some("Boss@Example.edu")), Role::Admin);
        assert_eq!(list.role_for(Some("intern@example.edu")), Role::User);
        assert_eq!(list.role_for(None), Role::User);
    }
}
