//! Repository layer for the report service.
//!
//! All queries use parameterized statements. Table and column names are
//! fixed in code and never derived from request input.

pub mod reports;
pub mod users;

use crate::errors::ApiError;
use thiserror::Error;

pub use reports::{PhotoAttach, ReportsRepository};
pub use users::{IdentityStore, PgIdentityStore, ProfileRepository};

/// Identity store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate key")]
    Duplicate,

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation())
        {
            return StoreError::Duplicate;
        }
        StoreError::Database(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Database(err.to_string())
    }
}
