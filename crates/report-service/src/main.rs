//! TraceQ Report Service
//!
//! Entry point for the lost-and-found reporting backend.

use report_service::config::Config;
use report_service::context::AppContext;
use report_service::observability::metrics::init_metrics_recorder;
use report_service::routes;
use report_service::storage::{ObjectStore, S3ObjectStore, UnconfiguredObjectStore};
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POOL_MAX_CONNECTIONS: u32 = 20;
const POOL_MIN_CONNECTIONS: u32 = 2;
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "report_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting report service");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        key_source_url = %config.key_source_url,
        jwt_leeway_seconds = config.jwt_leeway.as_secs(),
        admin_count = config.admin_emails.len(),
        uploads_enabled = config.s3_bucket.is_some(),
        "Configuration loaded"
    );

    // Install the Prometheus recorder before anything records
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Metrics recorder could not be installed");
        e
    })?;

    // Every connection carries a server-side statement timeout
    let db_url_with_timeout = with_statement_timeout(
        config.database_url.expose_secret(),
        config.db_statement_timeout_seconds,
    );
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .min_connections(POOL_MIN_CONNECTIONS)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .idle_timeout(POOL_IDLE_TIMEOUT)
        .max_lifetime(POOL_MAX_LIFETIME)
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!(error = %e, "Report database unreachable");
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Migrations failed");
            e
        })?;

    // Only load AWS configuration when a bucket is configured
    let objects: Arc<dyn ObjectStore> = match &config.s3_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, region = %config.aws_region, "Object storage enabled");
            Arc::new(
                S3ObjectStore::from_env(
                    bucket.clone(),
                    config.aws_region.clone(),
                    config.cdn_domain.clone(),
                    config.presign_ttl,
                )
                .await,
            )
        }
        None => {
            warn!("AWS_S3_BUCKET not set, photo uploads are disabled");
            Arc::new(UnconfiguredObjectStore::new(config.cdn_domain.clone()))
        }
    };

    let bind_address = config.bind_address.clone();
    let drain_period = config.drain_period;

    let ctx = Arc::new(AppContext::new(config, db_pool, objects, metrics_handle));

    // Warm the key set so the first request does not pay for the fetch
    if let Err(e) = ctx.key_cache.key_set().await {
        warn!(error = %e, "Signing keys not available at startup");
    }

    let app = routes::build_app(ctx).map_err(|e| {
        error!(error = %e, "Route table rejected");
        e
    })?;

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!(bind_address = %bind_address, error = %e, "Bind address is not a socket address");
        e
    })?;

    info!(%addr, "Report service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_period))
    .await?;

    info!("Report service stopped");

    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives and the drain period has passed.
async fn shutdown_signal(drain_period: Duration) {
    let interrupted = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(signal = "SIGINT", error = %e, "Cannot install signal handler");
            std::future::pending::<()>().await;
        }
        "SIGINT"
    };

    #[cfg(unix)]
    let terminated = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(signal = "SIGTERM", error = %e, "Cannot install signal handler");
                std::future::pending::<()>().await;
            }
        }
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminated = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupted => name,
        name = terminated => name,
    };

    info!(signal = received, drain_seconds = drain_period.as_secs(), "Shutting down");
    if !drain_period.is_zero() {
        tokio::time::sleep(drain_period).await;
    }
}

/// Append a `statement_timeout` connection option to a Postgres URL.
fn with_statement_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_statement_timeout() {
        assert_eq!(
            with_statement_timeout("postgres://localhost/traceq", 5),
            "postgres://localhost/traceq?options=-c%20statement_timeout%3D5s"
        );
        assert_eq!(
            with_statement_timeout("postgres://localhost/traceq?sslmode=require", 10),
            "postgres://localhost/traceq?sslmode=require&options=-c%20statement_timeout%3D10s"
        );
    }
}
