//! Principal and profile persistence.
//!
//! [`IdentityStore`] is the narrow contract authentication depends on;
//! [`PgIdentityStore`] implements it over `user_data`. Profile reads and
//! partial updates go through [`ProfileRepository`].
//!
//! # Security
//!
//! - `firebase_uid` is UNIQUE; concurrent first logins for one subject
//!   surface as [`StoreError::Duplicate`] for every insert but one
//! - Profile updates bind every value; column names come from a fixed list

use crate::errors::ApiError;
use crate::models::{NewPrincipal, Principal, PrincipalRow, ProfilePatch, UserProfileRow};
use crate::observability::metrics::record_db_query;
use crate::repositories::StoreError;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Instant;
use tracing::instrument;

/// Persistence contract for principals.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up the principal bound to a provider subject.
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<Principal>, StoreError>;

    /// Create a principal.
    ///
    /// Returns [`StoreError::Duplicate`] when the subject or custom id is
    /// already taken.
    async fn insert_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError>;

    /// Look up a principal by database id.
    async fn get_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError>;
}

const PRINCIPAL_COLUMNS: &str = "id, firebase_uid, custom_id, email, role, is_active";

/// [`IdentityStore`] over Postgres.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_principal(row: PrincipalRow) -> Result<Principal, StoreError> {
    Principal::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn record<T>(operation: &'static str, start: Instant, result: &Result<T, StoreError>) {
    let status = match result {
        Ok(_) => "success",
        Err(StoreError::Duplicate) => "duplicate",
        Err(_) => "error",
    };
    record_db_query(operation, status, start.elapsed());
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    #[instrument(skip_all, name = "rs.repositories.users.find_by_external_id")]
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let start = Instant::now();
        let result = async {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {PRINCIPAL_COLUMNS} FROM user_data WHERE firebase_uid = $1"
            ))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(to_principal).transpose()
        }
        .await;
        record("find_by_external_id", start, &result);
        result
    }

    #[instrument(skip_all, name = "rs.repositories.users.insert_principal")]
    async fn insert_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError> {
        let start = Instant::now();
        let result = async {
            let row: PrincipalRow = sqlx::query_as(&format!(
                r#"
                INSERT INTO user_data (firebase_uid, custom_id, email, role, is_active)
                VALUES ($1, $2, $3, $4, TRUE)
                RETURNING {PRINCIPAL_COLUMNS}
                "#
            ))
            .bind(&new.external_id)
            .bind(&new.custom_id)
            .bind(&new.email)
            .bind(new.role.as_str())
            .fetch_one(&self.pool)
            .await?;
            to_principal(row)
        }
        .await;
        record("insert_principal", start, &result);
        result
    }

    #[instrument(skip_all, name = "rs.repositories.users.get_by_id")]
    async fn get_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        let start = Instant::now();
        let result = async {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {PRINCIPAL_COLUMNS} FROM user_data WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(to_principal).transpose()
        }
        .await;
        record("get_by_id", start, &result);
        result
    }
}

/// Repository for profile reads and updates.
pub struct ProfileRepository;

impl ProfileRepository {
    /// Fetch the full profile of a principal.
    #[instrument(skip_all, fields(user_id = user_id))]
    pub async fn get(pool: &PgPool, user_id: i64) -> Result<Option<UserProfileRow>, ApiError> {
        let row: Option<UserProfileRow> = sqlx::query_as(
            r#"
            SELECT id, custom_id, email, full_name, phone, student_id, department, photo, role
            FROM user_data
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Build the `UPDATE` for `patch`, or `None` when there is nothing to set.
    #[must_use]
    pub fn build_update(patch: &ProfilePatch, user_id: i64) -> Option<QueryBuilder<'static, Postgres>> {
        let assignments = patch.assignments();
        if assignments.is_empty() {
            return None;
        }

        let mut builder = QueryBuilder::new("UPDATE user_data SET ");
        {
            let mut set = builder.separated(", ");
            for (column, value) in assignments {
                set.push(column)
                    .push_unseparated(" = ")
                    .push_bind_unseparated(value.map(str::to_string));
            }
            set.push("updated_at = NOW()");
        }
        builder.push(" WHERE id = ").push_bind(user_id);

        Some(builder)
    }

    /// Apply a partial update. Returns `false` if the patch was empty.
    #[instrument(skip_all, fields(user_id = user_id))]
    pub async fn apply_patch(
        pool: &PgPool,
        user_id: i64,
        patch: &ProfilePatch,
    ) -> Result<bool, ApiError> {
        let Some(mut builder) = Self::build_update(patch, user_id) else {
            return Ok(false);
        };

        let start = Instant::now();
        let result = builder.build().execute(pool).await;
        record_db_query(
            "apply_profile_patch",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result?;

        Ok(true)
    }
}
