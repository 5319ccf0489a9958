//! Report service models.
//!
//! Principals and profiles live here; report types are in [`report`].

pub mod report;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

pub use report::{NewReport, Report, ReportFilter, ReportKind, ReportPhoto};

// ============================================================================
// Principals
// ============================================================================

/// Authorization role of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Returns the string representation stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(value)),
        }
    }
}

/// Identity asserted by a verified token for the current request.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Provider subject.
    pub external_id: String,

    /// Email claim, if the token carried one.
    pub email: Option<String>,

    /// Sign-in provider, e.g. `google.com` or `password`.
    pub provider: Option<String>,
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("external_id", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("provider", &self.provider)
            .finish()
    }
}

/// A registered user of the service.
#[derive(Clone)]
pub struct Principal {
    /// Database id.
    pub id: i64,

    /// Identity provider subject. Unique.
    pub external_id: String,

    /// Public identifier, e.g. `U3F9A0C21B7`.
    pub custom_id: String,

    pub email: Option<String>,

    pub role: Role,

    /// Disabled principals are rejected at authentication.
    pub is_active: bool,

    /// Set by the auth gateway for the request being served.
    pub session: Option<SessionIdentity>,
}

impl Principal {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Custom Debug implementation that redacts identifying fields.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("external_id", &"[REDACTED]")
            .field("custom_id", &self.custom_id)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("session", &self.session)
            .finish()
    }
}

/// Principal row as read from `user_data`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrincipalRow {
    pub id: i64,
    pub firebase_uid: String,
    pub custom_id: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = UnknownRole;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        Ok(Principal {
            id: row.id,
            external_id: row.firebase_uid,
            custom_id: row.custom_id,
            email: row.email,
            role: Role::try_from(row.role)?,
            is_active: row.is_active,
            session: None,
        })
    }
}

/// Input for creating a principal on first login.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub external_id: String,
    pub custom_id: String,
    pub email: Option<String>,
    pub role: Role,
}

// ============================================================================
// Profiles
// ============================================================================

/// Full profile row as read from `user_data`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserProfileRow {
    pub id: i64,
    pub custom_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub photo: Option<String>,
    pub role: String,
}

/// Profile as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub custom_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub role: String,
    /// Object key of the profile photo.
    pub photo: Option<String>,
    /// Public URL of the profile photo.
    pub photo_url: Option<String>,
}

impl UserProfile {
    /// Build the client view, resolving the photo key with `resolve_url`.
    pub fn from_row(row: UserProfileRow, resolve_url: impl Fn(&str) -> Option<String>) -> Self {
        let photo_url = row.photo.as_deref().and_then(&resolve_url);
        UserProfile {
            id: row.id,
            custom_id: row.custom_id,
            email: row.email,
            full_name: row.full_name,
            phone: row.phone,
            student_id: row.student_id,
            department: row.department,
            role: row.role,
            photo: row.photo,
            photo_url,
        }
    }
}

/// Partial profile update.
///
/// Each field is `None` when absent from the request (left unchanged),
/// `Some(None)` when it should be cleared, and `Some(Some(v))` to set a
/// trimmed value. Request keys are accepted in snake_case or camelCase.
/// `email` is never read from a request body; it comes from the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, alias = "fullName", deserialize_with = "patch_value")]
    pub full_name: Option<Option<String>>,

    #[serde(default, deserialize_with = "patch_value")]
    pub phone: Option<Option<String>>,

    #[serde(default, alias = "studentId", deserialize_with = "patch_value")]
    pub student_id: Option<Option<String>>,

    #[serde(default, deserialize_with = "patch_value")]
    pub department: Option<Option<String>>,

    #[serde(default, deserialize_with = "patch_value")]
    pub photo: Option<Option<String>>,

    #[serde(skip)]
    pub email: Option<Option<String>>,
}

impl ProfilePatch {
    /// Column assignments in fixed column order. Column names never come
    /// from input.
    #[must_use]
    pub fn assignments(&self) -> Vec<(&'static str, Option<&str>)> {
        [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("student_id", &self.student_id),
            ("department", &self.department),
            ("photo", &self.photo),
            ("email", &self.email),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_ref().map(|v| (column, v.as_deref())))
        .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

/// Normalize one present patch field: empty or null clears it, strings are
/// trimmed, numbers and booleans are stored as text.
fn patch_value<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    let normalized = match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            return Err(D::Error::custom("profile fields must be strings"));
        }
    };
    Ok(Some(normalized))
}
