//! Report photo upload handlers.
//!
//! Photos go straight from the client to the bucket:
//!
//! 1. `POST /upload/presign` signs one `PUT` per file
//! 2. the client uploads
//! 3. `POST /upload/confirm` attaches the keys to a report the caller owns
//!
//! `DELETE /upload/delete` removes one attached photo, object and row.

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use crate::errors::ApiError;
use crate::handlers::reports::{attached_or_too_many, validate_photo_keys, MAX_PHOTOS_PER_REPORT};
use crate::handlers::{authenticate, non_blank, ok_envelope, HandlerResult};
use crate::ids::object_key_token;
use crate::models::ReportKind;
use crate::repositories::ReportsRepository;
use crate::storage::image_extension;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Files one presign request may cover.
pub const MAX_FILES_PER_REQUEST: usize = 10;

const ACCESS_DENIED: ApiError = ApiError::Forbidden {
    code: "access_denied",
};

fn parse_kind(value: Option<&str>) -> Result<ReportKind, ApiError> {
    value
        .map_or(Some(ReportKind::Lost), ReportKind::parse)
        .ok_or_else(|| ApiError::validation("type must be lost or found"))
}

#[derive(Debug, Deserialize)]
pub struct FileSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    /// `lost` (default) or `found`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<FileSpec>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PresignOutcome {
    Signed {
        original_name: String,
        file_key: String,
        upload_url: String,
        headers: std::collections::BTreeMap<String, String>,
    },
    Rejected {
        original_name: String,
        error: &'static str,
    },
}

/// Handler for POST /upload/presign
///
/// Files with an unsupported type are reported per file; the rest are
/// signed.
#[instrument(skip_all, name = "rs.handlers.uploads.presign")]
pub async fn presign(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    authenticate(&ctx, &req).await?;
    let body: PresignRequest = req.json()?;

    let kind = parse_kind(body.kind.as_deref())?;
    let files = body
        .files
        .ok_or_else(|| ApiError::validation("files is required"))?;
    if files.len() > MAX_FILES_PER_REQUEST {
        return Err(ApiError::validation(format!(
            "at most {MAX_FILES_PER_REQUEST} files per request"
        )));
    }

    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let extension = (!file.name.trim().is_empty())
            .then(|| image_extension(&file.content_type))
            .flatten();
        let Some(extension) = extension else {
            outcomes.push(PresignOutcome::Rejected {
                original_name: file.name,
                error: "invalid_file_type",
            });
            continue;
        };

        let token = object_key_token().map_err(|_| ApiError::Internal)?;
        let key = format!("{}/{token}.{extension}", kind.photo_prefix());
        let upload = ctx
            .objects
            .presign_put(&key, &file.content_type.trim().to_ascii_lowercase())
            .await?;

        outcomes.push(PresignOutcome::Signed {
            original_name: file.name,
            file_key: key,
            upload_url: upload.url,
            headers: upload.headers,
        });
    }

    Ok(ok_envelope(StatusCode::OK, json!({ "files": outcomes })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmedFile {
    #[serde(default)]
    pub file_key: String,
    #[serde(default)]
    pub original_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub report_type: Option<String>,
    #[serde(default)]
    pub report_custom_id: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<ConfirmedFile>>,
}

/// Handler for POST /upload/confirm
#[instrument(skip_all, name = "rs.handlers.uploads.confirm")]
pub async fn confirm(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let body: ConfirmRequest = req.json()?;

    let kind = body
        .report_type
        .as_deref()
        .and_then(ReportKind::parse)
        .ok_or_else(|| ApiError::validation("report_type must be lost or found"))?;
    let custom_id = non_blank(body.report_custom_id)
        .ok_or_else(|| ApiError::validation("report_custom_id is required"))?;
    let files = body
        .files
        .ok_or_else(|| ApiError::validation("files is required"))?;

    let Some((report_id, owner_id)) =
        ReportsRepository::find_owner(&ctx.pool, kind, &custom_id).await?
    else {
        return Err(ACCESS_DENIED);
    };
    if owner_id != principal.id {
        return Err(ACCESS_DENIED);
    }

    let mut names: HashMap<String, String> = HashMap::new();
    let mut keys = Vec::new();
    for file in files {
        let key = file.file_key.trim();
        if key.is_empty() {
            continue;
        }
        keys.push(key.to_string());
        names.entry(key.to_string()).or_insert(file.original_name);
    }
    let keys = validate_photo_keys(kind, keys)?;

    let saved = if keys.is_empty() {
        Vec::new()
    } else {
        attached_or_too_many(
            ReportsRepository::add_photos(&ctx.pool, report_id, &keys, MAX_PHOTOS_PER_REPORT)
                .await?,
        )?
    };

    let saved: Vec<_> = saved
        .into_iter()
        .map(|photo| {
            let original_name = names.get(&photo.photo).cloned().unwrap_or_default();
            json!({
                "id": photo.id,
                "file_key": photo.photo,
                "original_name": original_name,
            })
        })
        .collect();

    tracing::info!(
        target: "rs.handlers.uploads",
        report = %custom_id,
        count = saved.len(),
        "Photos attached"
    );

    Ok(ok_envelope(StatusCode::OK, json!({ "saved_files": saved })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub report_type: Option<String>,
    #[serde(default)]
    pub photo_id: Option<i64>,
}

/// Handler for DELETE /upload/delete
///
/// The object removed is the one recorded for the photo row, never a key
/// supplied by the client.
#[instrument(skip_all, name = "rs.handlers.uploads.delete")]
pub async fn delete(ctx: Arc<AppContext>, req: DispatchRequest) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let body: DeleteRequest = req.json()?;

    let kind = body
        .report_type
        .as_deref()
        .and_then(ReportKind::parse)
        .ok_or_else(|| ApiError::validation("report_type must be lost or found"))?;
    let photo_id = body
        .photo_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::validation("photo_id is required"))?;

    let photo = ReportsRepository::find_photo(&ctx.pool, kind, photo_id)
        .await?
        .filter(|p| p.owner_id == principal.id)
        .ok_or(ACCESS_DENIED)?;

    ctx.objects.delete_object(&photo.photo).await?;
    ReportsRepository::delete_photo(&ctx.pool, photo.id).await?;

    tracing::info!(target: "rs.handlers.uploads", photo_id, "Photo deleted");

    Ok(ok_envelope(StatusCode::OK, json!({ "message": "deleted" })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_defaults_to_lost() {
        assert_eq!(parse_kind(None).unwrap(), ReportKind::Lost);
        assert_eq!(parse_kind(Some("found")).unwrap(), ReportKind::Found);
        assert_eq!(parse_kind(Some("stolen")).unwrap_err().status_code(), 422);
    }

    #[test]
    fn test_presign_outcome_shapes() {
        let rejected = serde_json::to_value(PresignOutcome::Rejected {
            original_name: "doc.pdf".to_string(),
            error: "invalid_file_type",
        })
        .unwrap();
        assert_eq!(
            rejected,
            json!({"original_name": "doc.pdf", "error": "invalid_file_type"})
        );
    }

    #[test]
    fn test_delete_request_ignores_client_file_key() {
        let body: DeleteRequest = serde_json::from_value(json!({
            "report_type": "lost",
            "photo_id": 3,
            "file_key": "user/U1/avatar.png"
        }))
        .unwrap();

        assert_eq!(body.photo_id, Some(3));
    }
}
