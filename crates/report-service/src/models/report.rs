//! Lost and found report models.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for report listings.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page size a client may request.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Whether a report describes something lost or something found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Lost,
    Found,
}

impl ReportKind {
    /// Returns the string representation stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Lost => "lost",
            ReportKind::Found => "found",
        }
    }

    /// Parse `lost` or `found`, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lost" => Some(ReportKind::Lost),
            "found" => Some(ReportKind::Found),
            _ => None,
        }
    }

    /// First character of the public report id.
    #[must_use]
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ReportKind::Lost => "L",
            ReportKind::Found => "F",
        }
    }

    /// Object key prefix for this kind's photos.
    #[must_use]
    pub fn photo_prefix(&self) -> &'static str {
        match self {
            ReportKind::Lost => "lost-item-photos",
            ReportKind::Found => "found-item-photos",
        }
    }
}

/// Report row joined with its reporter.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub custom_id: String,
    pub kind: String,
    pub user_id: i64,
    pub item_type: String,
    pub item_model: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub location_details: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub secret_hint: Option<String>,
    pub report_time: DateTime<Utc>,
    pub reporter_custom_id: String,
    pub reporter_name: Option<String>,
}

/// Photo row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportPhotoRow {
    pub id: i64,
    pub report_id: i64,
    pub photo: String,
}

/// Photo attached to a report, as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPhoto {
    pub id: i64,
    /// Object key.
    pub photo: String,
    pub url: Option<String>,
}

/// Public identity of the principal who filed a report.
#[derive(Debug, Clone, Serialize)]
pub struct Reporter {
    pub custom_id: String,
    pub full_name: Option<String>,
}

/// A report as returned to clients. The verification secret hash is never
/// part of it.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: i64,
    pub custom_id: String,
    pub kind: ReportKind,
    #[serde(skip)]
    pub user_id: i64,
    pub item_type: String,
    pub item_model: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub location_details: Option<String>,
    /// `YYYY-MM-DD`.
    pub date: Option<String>,
    /// `HH:MM:SS`.
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_hint: Option<String>,
    pub report_time: DateTime<Utc>,
    pub reporter: Reporter,
    pub photos: Vec<ReportPhoto>,
}

impl Report {
    /// Build the client view from a joined row. `kind` comes from the row;
    /// unknown values fall back to `fallback_kind`.
    pub fn from_row(row: ReportRow, fallback_kind: ReportKind, photos: Vec<ReportPhoto>) -> Self {
        Report {
            id: row.id,
            custom_id: row.custom_id,
            kind: ReportKind::parse(&row.kind).unwrap_or(fallback_kind),
            user_id: row.user_id,
            item_type: row.item_type,
            item_model: row.item_model,
            title: row.title,
            description: row.description,
            location: row.location,
            location_details: row.location_details,
            date: row.event_date.map(|d| d.format("%Y-%m-%d").to_string()),
            time: row.event_time.map(|t| t.format("%H:%M:%S").to_string()),
            secret_hint: row.secret_hint,
            report_time: row.report_time,
            reporter: Reporter {
                custom_id: row.reporter_custom_id,
                full_name: row.reporter_name,
            },
            photos,
        }
    }
}

/// Validated input for a new report.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub kind: ReportKind,
    pub user_id: i64,
    pub custom_id: String,
    pub item_type: String,
    pub item_model: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub location_details: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub secret_hint: Option<String>,
    pub secret_hash: Option<String>,
}

/// Listing filters, read from the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilter {
    pub item_type: Option<String>,
    pub location: Option<String>,
    /// Free text matched against title, description and item model.
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ReportFilter {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// A filter value with surrounding whitespace removed, or `None` if blank.
    #[must_use]
    pub fn non_blank(value: Option<&String>) -> Option<&str> {
        value.map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

/// Parse a `YYYY-MM-DD` date.
#[must_use]
pub fn parse_event_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Parse `HH:MM` or `HH:MM:SS`.
#[must_use]
pub fn parse_event_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}
