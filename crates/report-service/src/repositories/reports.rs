//! Lost and found report persistence.
//!
//! Both kinds share `reports` and `report_photos`; every query is scoped by
//! the `kind` column bound from a [`ReportKind`].

use crate::errors::ApiError;
use crate::models::report::{ReportPhotoRow, ReportRow};
use crate::models::{NewReport, Report, ReportFilter, ReportKind, ReportPhoto};
use crate::observability::metrics::record_db_query;
use crate::repositories::StoreError;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;

const REPORT_SELECT: &str = r#"
    SELECT
        r.id, r.custom_id, r.kind, r.user_id, r.item_type, r.item_model, r.title,
        r.description, r.location, r.location_details, r.event_date, r.event_time,
        r.secret_hint, r.report_time,
        u.custom_id AS reporter_custom_id,
        u.full_name AS reporter_name
    FROM reports r
    JOIN user_data u ON u.id = r.user_id
"#;

/// Outcome of [`ReportsRepository::add_photos`].
#[derive(Debug)]
pub enum PhotoAttach {
    /// Rows stored, in no particular order.
    Attached(Vec<ReportPhoto>),

    /// Nothing stored; the report already holds `existing` photos.
    OverLimit { existing: usize },
}

/// A report named either by database id or by public id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRef<'a> {
    Id(i64),
    CustomId(&'a str),
}

impl<'a> ReportRef<'a> {
    /// Numeric values are database ids; anything else is a public id.
    #[must_use]
    pub fn parse(value: &'a str) -> Self {
        value
            .parse::<i64>()
            .map(ReportRef::Id)
            .unwrap_or(ReportRef::CustomId(value))
    }
}

/// A stored photo together with the owner of its report.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OwnedPhoto {
    pub id: i64,
    pub report_id: i64,
    pub photo: String,
    pub owner_id: i64,
}

/// Escape `LIKE` metacharacters and wrap in `%`.
fn contains_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Build the listing query for `kind` with `filter` applied.
fn list_query(kind: ReportKind, filter: &ReportFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(REPORT_SELECT);
    builder.push(" WHERE r.kind = ").push_bind(kind.as_str());

    if let Some(item_type) = ReportFilter::non_blank(filter.item_type.as_ref()) {
        builder
            .push(" AND r.item_type = ")
            .push_bind(item_type.to_string());
    }

    if let Some(location) = ReportFilter::non_blank(filter.location.as_ref()) {
        builder
            .push(" AND r.location ILIKE ")
            .push_bind(contains_pattern(location));
    }

    if let Some(q) = ReportFilter::non_blank(filter.q.as_ref()) {
        let pattern = contains_pattern(q);
        builder
            .push(" AND (r.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR r.description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR r.item_model ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    builder
        .push(" ORDER BY r.report_time DESC, r.id DESC LIMIT ")
        .push_bind(filter.limit())
        .push(" OFFSET ")
        .push_bind(filter.offset());

    builder
}

fn timed<T>(operation: &'static str, start: Instant, result: &Result<T, sqlx::Error>) {
    let status = if result.is_ok() { "success" } else { "error" };
    record_db_query(operation, status, start.elapsed());
}

/// Repository for report operations.
pub struct ReportsRepository;

impl ReportsRepository {
    /// Insert a report and return its database id.
    ///
    /// Returns [`StoreError::Duplicate`] if the public id is taken.
    #[instrument(skip_all, fields(kind = new.kind.as_str()))]
    pub async fn create(pool: &PgPool, new: &NewReport) -> Result<i64, StoreError> {
        let start = Instant::now();
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO reports (
                custom_id, kind, user_id, item_type, item_model, title, description,
                location, location_details, event_date, event_time, secret_hint, secret_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&new.custom_id)
        .bind(new.kind.as_str())
        .bind(new.user_id)
        .bind(&new.item_type)
        .bind(&new.item_model)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.location)
        .bind(&new.location_details)
        .bind(new.event_date)
        .bind(new.event_time)
        .bind(&new.secret_hint)
        .bind(&new.secret_hash)
        .fetch_one(pool)
        .await;
        timed("create_report", start, &result);

        Ok(result.map_err(StoreError::from)?.0)
    }

    /// List reports of one kind, newest first.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn list(
        pool: &PgPool,
        kind: ReportKind,
        filter: &ReportFilter,
    ) -> Result<Vec<Report>, ApiError> {
        let start = Instant::now();
        let result: Result<Vec<ReportRow>, sqlx::Error> = list_query(kind, filter)
            .build_query_as()
            .fetch_all(pool)
            .await;
        timed("list_reports", start, &result);

        Self::with_photos(pool, kind, result?).await
    }

    /// List reports of one kind filed by the principal with public id
    /// `owner_custom_id`. Returns `None` if no such principal exists.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn list_by_owner(
        pool: &PgPool,
        kind: ReportKind,
        owner_custom_id: &str,
    ) -> Result<Option<Vec<Report>>, ApiError> {
        let owner: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM user_data WHERE custom_id = $1")
                .bind(owner_custom_id)
                .fetch_optional(pool)
                .await?;

        let Some((owner_id,)) = owner else {
            return Ok(None);
        };

        let rows: Vec<ReportRow> = sqlx::query_as(&format!(
            "{REPORT_SELECT} WHERE r.kind = $1 AND r.user_id = $2 ORDER BY r.report_time DESC, r.id DESC"
        ))
        .bind(kind.as_str())
        .bind(owner_id)
        .fetch_all(pool)
        .await?;

        Self::with_photos(pool, kind, rows).await.map(Some)
    }

    /// Fetch one report of `kind`.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn find(
        pool: &PgPool,
        kind: ReportKind,
        report: ReportRef<'_>,
    ) -> Result<Option<Report>, ApiError> {
        let sql = match report {
            ReportRef::Id(_) => format!("{REPORT_SELECT} WHERE r.kind = $1 AND r.id = $2"),
            ReportRef::CustomId(_) => {
                format!("{REPORT_SELECT} WHERE r.kind = $1 AND r.custom_id = $2")
            }
        };

        let query = sqlx::query_as::<_, ReportRow>(&sql).bind(kind.as_str());
        let query = match report {
            ReportRef::Id(id) => query.bind(id),
            ReportRef::CustomId(custom_id) => query.bind(custom_id.to_string()),
        };

        let start = Instant::now();
        let result = query.fetch_optional(pool).await;
        timed("find_report", start, &result);

        let Some(row) = result? else {
            return Ok(None);
        };

        let mut reports = Self::with_photos(pool, kind, vec![row]).await?;
        Ok(reports.pop())
    }

    /// Delete a report and its photo rows. Returns the photo object keys
    /// that were attached to it.
    #[instrument(skip_all, fields(report_id = report_id))]
    pub async fn delete(pool: &PgPool, report_id: i64) -> Result<Vec<String>, ApiError> {
        let mut tx = pool.begin().await?;

        let keys: Vec<(String,)> =
            sqlx::query_as("DELETE FROM report_photos WHERE report_id = $1 RETURNING photo")
                .bind(report_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM reports WHERE id = $1")
            .bind(report_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(keys.into_iter().map(|(key,)| key).collect())
    }

    /// Database id and owner of a report named by public id.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn find_owner(
        pool: &PgPool,
        kind: ReportKind,
        custom_id: &str,
    ) -> Result<Option<(i64, i64)>, ApiError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, user_id FROM reports WHERE kind = $1 AND custom_id = $2")
                .bind(kind.as_str())
                .bind(custom_id)
                .fetch_optional(pool)
                .await?;
        Ok(row)
    }

    /// Attach photos to a report unless that would leave it with more than
    /// `limit` photos. The report row is locked while the existing photos
    /// are counted, so concurrent attaches cannot overshoot the cap.
    #[instrument(skip_all, fields(report_id = report_id, count = keys.len()))]
    pub async fn add_photos(
        pool: &PgPool,
        report_id: i64,
        keys: &[String],
        limit: usize,
    ) -> Result<PhotoAttach, ApiError> {
        let start = Instant::now();
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT id FROM reports WHERE id = $1 FOR UPDATE")
            .bind(report_id)
            .fetch_optional(&mut *tx)
            .await?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM report_photos WHERE report_id = $1")
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
        let existing = usize::try_from(existing).unwrap_or(usize::MAX);

        if existing.saturating_add(keys.len()) > limit {
            tx.rollback().await?;
            record_db_query("add_photos", "rejected", start.elapsed());
            return Ok(PhotoAttach::OverLimit { existing });
        }

        let rows: Vec<ReportPhotoRow> = sqlx::query_as(
            r#"
            INSERT INTO report_photos (report_id, photo)
            SELECT $1, key FROM UNNEST($2::text[]) AS key
            RETURNING id, report_id, photo
            "#,
        )
        .bind(report_id)
        .bind(keys)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        record_db_query("add_photos", "success", start.elapsed());

        Ok(PhotoAttach::Attached(
            rows.into_iter()
                .map(|row| ReportPhoto {
                    id: row.id,
                    photo: row.photo,
                    url: None,
                })
                .collect(),
        ))
    }

    /// A photo of a `kind` report, with the report's owner.
    #[instrument(skip_all, fields(photo_id = photo_id))]
    pub async fn find_photo(
        pool: &PgPool,
        kind: ReportKind,
        photo_id: i64,
    ) -> Result<Option<OwnedPhoto>, ApiError> {
        let row: Option<OwnedPhoto> = sqlx::query_as(
            r#"
            SELECT p.id, p.report_id, p.photo, r.user_id AS owner_id
            FROM report_photos p
            JOIN reports r ON r.id = p.report_id
            WHERE p.id = $1 AND r.kind = $2
            "#,
        )
        .bind(photo_id)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip_all, fields(photo_id = photo_id))]
    pub async fn delete_photo(pool: &PgPool, photo_id: i64) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM report_photos WHERE id = $1")
            .bind(photo_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Load photos for `rows` in one query and assemble reports.
    async fn with_photos(
        pool: &PgPool,
        kind: ReportKind,
        rows: Vec<ReportRow>,
    ) -> Result<Vec<Report>, ApiError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let photo_rows: Vec<ReportPhotoRow> = sqlx::query_as(
            "SELECT id, report_id, photo FROM report_photos WHERE report_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?;

        let mut photos: HashMap<i64, Vec<ReportPhoto>> = HashMap::new();
        for row in photo_rows {
            photos.entry(row.report_id).or_default().push(ReportPhoto {
                id: row.id,
                photo: row.photo,
                url: None,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let attached = photos.remove(&row.id).unwrap_or_default();
                Report::from_row(row, kind, attached)
            })
            .collect())
    }
}
