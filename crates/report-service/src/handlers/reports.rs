//! Lost and found report handlers.
//!
//! Each handler serves both kinds; the route table binds the kind.

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use crate::errors::ApiError;
use crate::handlers::{authenticate, non_blank, ok_envelope, HandlerResult};
use crate::ids::report_custom_id;
use crate::models::report::{parse_event_date, parse_event_time};
use crate::models::{NewReport, Principal, Report, ReportFilter, ReportKind, ReportPhoto};
use crate::repositories::reports::ReportRef;
use crate::repositories::{PhotoAttach, ReportsRepository, StoreError};
use crate::storage::ObjectStore;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

/// Attempts at a fresh public id when one collides.
const MAX_CUSTOM_ID_ATTEMPTS: usize = 3;

const REPORT_NOT_FOUND: ApiError = ApiError::NotFound {
    code: "not_found",
    message: "Report not found",
};

/// Photo keys accepted with one report.
pub const MAX_PHOTOS_PER_REPORT: usize = 10;

/// Body of `POST /report-lost-item` and `POST /report-found-item`.
///
/// Dates and times are read from `lost_*` or `found_*` keys.
#[derive(Debug, Default, Deserialize)]
pub struct CreateReportRequest {
    /// Public id of the reporter. Optional; when present it must be the
    /// caller's.
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub item_model: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub location_details: Option<String>,
    #[serde(default, alias = "lost_date", alias = "found_date")]
    pub date: Option<String>,
    #[serde(default, alias = "lost_time", alias = "found_time")]
    pub time: Option<String>,
    #[serde(default)]
    pub secret_hint: Option<String>,
    /// Plain secret the reporter can later prove knowledge of. Stored only
    /// as a bcrypt hash.
    #[serde(default)]
    pub verification_secret: Option<String>,
    #[serde(default, alias = "photos")]
    pub photo_keys: Vec<String>,
}

/// A validated report body, before the public id and hash are added.
#[derive(Debug)]
pub struct ValidatedReport {
    pub report: NewReport,
    pub verification_secret: Option<String>,
    pub photo_keys: Vec<String>,
}

fn invalid_date(kind: ReportKind) -> ApiError {
    let (code, field) = match kind {
        ReportKind::Lost => ("invalid_lost_date", "lost_date"),
        ReportKind::Found => ("invalid_found_date", "found_date"),
    };
    ApiError::Validation {
        code,
        message: format!("{field} must be YYYY-MM-DD"),
    }
}

fn invalid_time(kind: ReportKind) -> ApiError {
    let (code, field) = match kind {
        ReportKind::Lost => ("invalid_lost_time", "lost_time"),
        ReportKind::Found => ("invalid_found_time", "found_time"),
    };
    ApiError::Validation {
        code,
        message: format!("{field} must be HH:MM or HH:MM:SS"),
    }
}

/// Photo keys that are non-blank and under `kind`'s prefix.
///
/// # Errors
///
/// Returns 422 `invalid_photo_key` for a key outside the prefix, and
/// `too_many_photos` past [`MAX_PHOTOS_PER_REPORT`].
pub fn validate_photo_keys(kind: ReportKind, keys: Vec<String>) -> Result<Vec<String>, ApiError> {
    let prefix = format!("{}/", kind.photo_prefix());
    let keys: Vec<String> = keys.into_iter().filter_map(|k| non_blank(Some(k))).collect();

    if keys.len() > MAX_PHOTOS_PER_REPORT {
        return Err(ApiError::Validation {
            code: "too_many_photos",
            message: format!("at most {MAX_PHOTOS_PER_REPORT} photos per report"),
        });
    }
    if keys.iter().any(|k| !k.starts_with(&prefix) || k.contains("..")) {
        return Err(ApiError::Validation {
            code: "invalid_photo_key",
            message: format!("photo keys must start with {prefix}"),
        });
    }
    Ok(keys)
}

/// Unwrap stored photos, or reject with 422 `too_many_photos`.
///
/// # Errors
///
/// Returns `too_many_photos` when the report is already at its cap.
pub fn attached_or_too_many(outcome: PhotoAttach) -> Result<Vec<ReportPhoto>, ApiError> {
    match outcome {
        PhotoAttach::Attached(photos) => Ok(photos),
        PhotoAttach::OverLimit { existing } => Err(ApiError::Validation {
            code: "too_many_photos",
            message: format!(
                "at most {MAX_PHOTOS_PER_REPORT} photos per report, {existing} already attached"
            ),
        }),
    }
}

impl CreateReportRequest {
    /// Validate the body for a report of `kind` filed by `principal`.
    ///
    /// # Errors
    ///
    /// - 403 `ownership_mismatch` if `custom_id` names someone else
    /// - 422 `validation_failed` without `item_type` and `title`
    /// - 422 on malformed dates, times or photo keys
    pub fn validate(self, kind: ReportKind, principal: &Principal) -> Result<ValidatedReport, ApiError> {
        if let Some(claimed) = non_blank(self.custom_id) {
            if claimed != principal.custom_id {
                return Err(ApiError::Forbidden {
                    code: "ownership_mismatch",
                });
            }
        }

        let (Some(item_type), Some(title)) = (non_blank(self.item_type), non_blank(self.title))
        else {
            return Err(ApiError::validation("item_type and title are required"));
        };

        let event_date = match non_blank(self.date) {
            Some(raw) => Some(parse_event_date(&raw).ok_or_else(|| invalid_date(kind))?),
            None => None,
        };
        let event_time = match non_blank(self.time) {
            Some(raw) => Some(parse_event_time(&raw).ok_or_else(|| invalid_time(kind))?),
            None => None,
        };

        let photo_keys = validate_photo_keys(kind, self.photo_keys)?;

        Ok(ValidatedReport {
            report: NewReport {
                kind,
                user_id: principal.id,
                custom_id: String::new(),
                item_type,
                item_model: non_blank(self.item_model),
                title,
                description: non_blank(self.description),
                location: non_blank(self.location),
                location_details: non_blank(self.location_details),
                event_date,
                event_time,
                secret_hint: non_blank(self.secret_hint),
                secret_hash: None,
            },
            verification_secret: self.verification_secret.filter(|s| !s.is_empty()),
            photo_keys,
        })
    }
}

/// Hash a verification secret off the async runtime.
async fn hash_secret(secret: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(secret, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| {
            tracing::error!(target: "rs.handlers.reports", error = %e, "Hashing task failed");
            ApiError::Internal
        })?
        .map_err(|e| {
            tracing::error!(target: "rs.handlers.reports", error = %e, "Secret hashing failed");
            ApiError::Internal
        })
}

fn with_photo_urls(mut report: Report, objects: &dyn ObjectStore) -> Report {
    for photo in &mut report.photos {
        photo.url = objects.public_url(&photo.photo);
    }
    report
}

/// Handler for POST /report-lost-item and POST /report-found-item
#[instrument(skip_all, name = "rs.handlers.reports.create", fields(kind = kind.as_str()))]
pub async fn create_report(
    ctx: Arc<AppContext>,
    req: DispatchRequest,
    kind: ReportKind,
) -> HandlerResult {
    let principal = authenticate(&ctx, &req).await?;
    let body: CreateReportRequest = req.json()?;
    let ValidatedReport {
        mut report,
        verification_secret,
        photo_keys,
    } = body.validate(kind, &principal)?;

    if let Some(secret) = verification_secret {
        report.secret_hash = Some(hash_secret(secret).await?);
    }

    let mut created = None;
    for attempt in 1..=MAX_CUSTOM_ID_ATTEMPTS {
        report.custom_id = report_custom_id(kind, Utc::now()).map_err(|_| ApiError::Internal)?;
        match ReportsRepository::create(&ctx.pool, &report).await {
            Ok(id) => {
                created = Some(id);
                break;
            }
            Err(StoreError::Duplicate) => {
                tracing::warn!(target: "rs.handlers.reports", attempt, "Report id collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    let id = created.ok_or(ApiError::Internal)?;

    let photos_added = if photo_keys.is_empty() {
        0
    } else {
        attached_or_too_many(
            ReportsRepository::add_photos(&ctx.pool, id, &photo_keys, MAX_PHOTOS_PER_REPORT)
                .await?,
        )?
        .len()
    };

    tracing::info!(
        target: "rs.handlers.reports",
        custom_id = %report.custom_id,
        photos_added,
        "Report created"
    );

    Ok(ok_envelope(
        StatusCode::CREATED,
        json!({
            kind.as_str(): {
                "id": id,
                "custom_id": report.custom_id,
                "photos_added": photos_added,
            }
        }),
    ))
}

/// Handler for GET /lost-items and GET /found-items
#[instrument(skip_all, name = "rs.handlers.reports.list", fields(kind = kind.as_str()))]
pub async fn list_reports(
    ctx: Arc<AppContext>,
    req: DispatchRequest,
    kind: ReportKind,
) -> HandlerResult {
    authenticate(&ctx, &req).await?;
    let filter: ReportFilter = req.query()?;

    let items: Vec<Report> = ReportsRepository::list(&ctx.pool, kind, &filter)
        .await?
        .into_iter()
        .map(|r| with_photo_urls(r, ctx.objects.as_ref()))
        .collect();

    Ok(ok_envelope(
        StatusCode::OK,
        json!({ "items": items, "count": items.len() }),
    ))
}

/// Handler for GET /lost-items/{id} and GET /found-items/{id}
///
/// `id` is a database id or a public id.
#[instrument(skip_all, name = "rs.handlers.reports.get", fields(kind = kind.as_str()))]
pub async fn get_report(
    ctx: Arc<AppContext>,
    req: DispatchRequest,
    kind: ReportKind,
) -> HandlerResult {
    authenticate(&ctx, &req).await?;
    let id = req.param("id")?;

    let report = ReportsRepository::find(&ctx.pool, kind, ReportRef::parse(id))
        .await?
        .ok_or(REPORT_NOT_FOUND)?;

    Ok(ok_envelope(
        StatusCode::OK,
        json!({ "item": with_photo_urls(report, ctx.objects.as_ref()) }),
    ))
}

/// Handler for DELETE /lost-items/{id} and DELETE /found-items/{id}
///
/// Owner or admin only. Answers 204. Stored photo objects are removed
/// after the rows; a failed object delete is logged and does not undo the
/// report deletion.
#[instrument(skip_all, name = "rs.handlers.reports.delete", fields(kind = kind.as_str()))]
pub async fn delete_report(
    ctx: Arc<AppContext>,
    req: DispatchRequest,
    kind: ReportKind,
) -> Result<Response, ApiError> {
    let principal = authenticate(&ctx, &req).await?;
    let id = req.param("id")?;

    let report = ReportsRepository::find(&ctx.pool, kind, ReportRef::parse(id))
        .await?
        .ok_or(REPORT_NOT_FOUND)?;

    if report.user_id != principal.id && !principal.is_admin() {
        return Err(ApiError::Forbidden { code: "forbidden" });
    }

    let keys = ReportsRepository::delete(&ctx.pool, report.id).await?;
    for key in &keys {
        if let Err(e) = ctx.objects.delete_object(key).await {
            tracing::warn!(target: "rs.handlers.reports", error = %e, "Failed to delete report photo object");
        }
    }

    tracing::info!(
        target: "rs.handlers.reports",
        custom_id = %report.custom_id,
        by_admin = report.user_id != principal.id,
        "Report deleted"
    );

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Handler for GET /users/{custom_id}/lost-items and
/// GET /users/{custom_id}/found-items
///
/// An unknown user yields an empty list.
#[instrument(skip_all, name = "rs.handlers.reports.by_user", fields(kind = kind.as_str()))]
pub async fn reports_by_user(
    ctx: Arc<AppContext>,
    req: DispatchRequest,
    kind: ReportKind,
) -> HandlerResult {
    authenticate(&ctx, &req).await?;
    let owner = req.param("custom_id")?;

    let items: Vec<Report> = ReportsRepository::list_by_owner(&ctx.pool, kind, owner)
        .await?
        .unwrap_or_default()
        .into_iter()
        .map(|r| with_photo_urls(r, ctx.objects.as_ref()))
        .collect();

    Ok(ok_envelope(StatusCode::OK, json!({ "items": items })))
}
