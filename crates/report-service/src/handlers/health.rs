//! Health check handler.

use crate::context::AppContext;
use crate::dispatch::DispatchRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

pub const SERVICE_NAME: &str = "traceq-backend";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    /// RFC 3339, UTC.
    pub time: String,
    pub db: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DatabaseProbe {
    ping: i32,
    server_version: String,
    db_name: String,
}

/// Handler for GET /health
///
/// Pings the database. Answers 200 with `ok: true` when it responds and
/// 500 with `error: "db_connect_failed"` when it does not.
#[instrument(skip_all, name = "rs.health.check")]
pub async fn health_check(ctx: Arc<AppContext>, _req: DispatchRequest) -> Response {
    let probe = sqlx::query_as::<_, DatabaseProbe>(
        "SELECT 1 AS ping, version() AS server_version, current_database() AS db_name",
    )
    .fetch_one(&ctx.pool)
    .await;

    let time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let (status, body) = match probe {
        Ok(probe) => (
            StatusCode::OK,
            HealthResponse {
                ok: true,
                service: SERVICE_NAME,
                time,
                db: DatabaseHealth {
                    connected: true,
                    ping: Some(probe.ping == 1),
                    server_version: Some(probe.server_version),
                    db_name: Some(probe.db_name),
                },
                error: None,
            },
        ),
        Err(e) => {
            tracing::error!(target: "rs.handlers.health", error = %e, "Database health probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                HealthResponse {
                    ok: false,
                    service: SERVICE_NAME,
                    time,
                    db: DatabaseHealth::default(),
                    error: Some("db_connect_failed"),
                },
            )
        }
    };

    (status, Json(body)).into_response()
}
