//! Profile handlers: `/me`, sign-up, sign-in, profile updates and avatar
//! upload signing.

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use crate::errors::ApiError;
use crate::handlers::{authenticate, non_blank, ok_envelope, HandlerResult};
use crate::ids::object_key_token;
use crate::models::{Principal, ProfilePatch, UserProfile};
use crate::repositories::ProfileRepository;
use crate::storage::image_extension;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

/// Content type assumed for avatar uploads that do not name one.
const DEFAULT_AVATAR_CONTENT_TYPE: &str = "image/jpeg";

async fn load_profile(ctx: &AppContext, principal: &Principal) -> Result<UserProfile, ApiError> {
    let row = ProfileRepository::get(&ctx.pool, principal.id)
        .await?
        .ok_or(ApiError::NotFound {
            code: "user_not_found",
            message: "User not found",
        })?;
    Ok(UserProfile::from_row(row, |key| ctx.objects.public_url(key)))
}

fn profile_response(profile: UserProfile) -> HandlerResult {
    Ok(ok_envelope(StatusCode::OK, json!({ "user": profile })))
}

/// Object key prefix owned by a principal's avatar uploads.
fn avatar_prefix(principal: &Principal) -> String {
    format!("user/{}/", principal.custom_id)
}

/// Handler for GET /me
#[instrument(skip_all, name = "rs.handlers.profile.me")]
pub async fn me(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    profile_response(load_profile(&ctx, &principal).await?)
}

/// Handler for POST /auth/signin
///
/// Authentication provisions the principal on first sight; sign-in only
/// returns the profile.
#[instrument(skip_all, name = "rs.handlers.profile.signin")]
pub async fn signin(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    tracing::debug!(target: "rs.handlers.profile", custom_id = %principal.custom_id, "Signed in");
    profile_response(load_profile(&ctx, &principal).await?)
}

/// Handler for POST /auth/signup
///
/// Applies the profile fields in the body and syncs the email from the
/// verified token.
#[instrument(skip_all, name = "rs.handlers.profile.signup")]
pub async fn signup(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let mut patch: ProfilePatch = req.json()?;

    if let Some(email) = principal
        .session
        .as_ref()
        .and_then(|s| s.email.as_deref())
        .filter(|e| !e.trim().is_empty())
    {
        patch.email = Some(Some(email.trim().to_string()));
    }

    ProfileRepository::apply_patch(&ctx.pool, principal.id, &patch).await?;
    profile_response(load_profile(&ctx, &principal).await?)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, alias = "fullName")]
    pub full_name: Option<String>,

    /// Key of an avatar uploaded through `/user/profile/presign`.
    #[serde(default, alias = "photoKey")]
    pub photo_key: Option<String>,
}

impl UpdateProfileRequest {
    /// Turn the request into a patch. Blank values leave the column as is.
    ///
    /// # Errors
    ///
    /// Returns 403 `photo_key_not_owned` when the photo key lies outside
    /// the principal's avatar prefix.
    pub fn into_patch(self, principal: &Principal) -> Result<ProfilePatch, ApiError> {
        let mut patch = ProfilePatch::default();

        if let Some(full_name) = non_blank(self.full_name) {
            patch.full_name = Some(Some(full_name));
        }

        if let Some(photo_key) = non_blank(self.photo_key) {
            if !photo_key.starts_with(&avatar_prefix(principal)) {
                return Err(ApiError::Forbidden {
                    code: "photo_key_not_owned",
                });
            }
            patch.photo = Some(Some(photo_key));
        }

        Ok(patch)
    }
}

/// Handler for POST /user/update-profile
#[instrument(skip_all, name = "rs.handlers.profile.update")]
pub async fn update_profile(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let body: UpdateProfileRequest = req.json()?;
    let patch = body.into_patch(&principal)?;

    if ProfileRepository::apply_patch(&ctx.pool, principal.id, &patch).await? {
        tracing::info!(target: "rs.handlers.profile", custom_id = %principal.custom_id, "Profile updated");
    }
    profile_response(load_profile(&ctx, &principal).await?)
}

#[derive(Debug, Default, Deserialize)]
pub struct AvatarPresignRequest {
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Handler for POST /user/profile/presign
///
/// Signs an upload to `user/<custom_id>/avatar_<token>.<ext>`. The client
/// then sends the returned key to `/user/update-profile`.
#[instrument(skip_all, name = "rs.handlers.profile.presign")]
pub async fn presign_avatar(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let body: AvatarPresignRequest = req.json()?;

    let content_type = non_blank(body.content_type)
        .unwrap_or_else(|| DEFAULT_AVATAR_CONTENT_TYPE.to_string())
        .to_ascii_lowercase();
    let extension = image_extension(&content_type).ok_or_else(|| ApiError::Validation {
        code: "invalid_file_type",
        message: format!("unsupported content type: {content_type}"),
    })?;

    let token = object_key_token().map_err(|_| ApiError::Internal)?;
    let key = format!("{}avatar_{token}.{extension}", avatar_prefix(&principal));

    let upload = ctx.objects.presign_put(&key, &content_type).await?;

    Ok(ok_envelope(
        StatusCode::OK,
        json!({
            "key": key,
            "put": upload,
            "public_url": ctx.objects.public_url(&key),
        }),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn principal() -> Principal {
        Principal {
            id: 5,
            external_id: "uid".to_string(),
            custom_id: "U00000000AB".to_string(),
            email: None,
            role: Role::User,
            is_active: true,
            session: None,
        }
    }

    #[test]
    fn test_update_profile_patch() {
        let body = UpdateProfileRequest {
            full_name: Some("  Ada  ".to_string()),
            photo_key: Some("user/U00000000AB/avatar_0a1b.png".to_string()),
        };

        let patch = body.into_patch(&principal()).unwrap();
        assert_eq!(patch.full_name, Some(Some("Ada".to_string())));
        assert_eq!(
            patch.photo,
            Some(Some("user/U00000000AB/avatar_0a1b.png".to_string()))
        );
    }

    #[test]
    fn test_update_profile_blank_fields_leave_columns() {
        let body = UpdateProfileRequest {
            full_name: Some("   ".to_string()),
            photo_key: None,
        };

        assert!(body.into_patch(&principal()).unwrap().is_empty());
    }

    #[test]
    fn test_update_profile_rejects_foreign_photo_key() {
        let body = UpdateProfileRequest {
            full_name: None,
            photo_key: Some("user/U99999999ZZ/avatar.png".to_string()),
        };

        let err = body.into_patch(&principal()).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.code(), "photo_key_not_owned");
    }
}
