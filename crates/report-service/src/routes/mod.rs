//! HTTP routes for the report service.
//!
//! The route table lives in a [`Dispatcher`]; axum only supplies the
//! server and the tower layers around it.

use crate::context::AppContext;
use crate::dispatch::{Dispatcher, RouteError};
use crate::handlers::{self, profile, reports, uploads};
use crate::middleware::{http_metrics_middleware, preflight_no_content, request_timeout};
use crate::models::ReportKind;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Whole-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid CORS origin: {0}")]
    CorsOrigin(String),
}

/// Register every endpoint. Registration order is match priority.
///
/// # Errors
///
/// Returns `RouteError` if a pattern does not compile.
pub fn register_routes(
    dispatcher: &mut Dispatcher<Arc<AppContext>>,
) -> Result<(), RouteError> {
    // Operational, unauthenticated
    dispatcher
        .route(Method::GET, "/health", handlers::health_check)?
        .route(Method::GET, "/metrics", handlers::metrics_handler)?;

    // Identity and profile
    dispatcher
        .route(Method::POST, "/auth/signup", profile::signup)?
        .route(Method::POST, "/auth/signin", profile::signin)?
        .route(Method::GET, "/me", profile::me)?
        .route(Method::POST, "/user/update-profile", profile::update_profile)?
        .route(Method::POST, "/user/profile/presign", profile::presign_avatar)?;

    // Reports
    for (kind, create, collection, by_user) in [
        (
            ReportKind::Lost,
            "/report-lost-item",
            "/lost-items",
            "/users/{custom_id}/lost-items",
        ),
        (
            ReportKind::Found,
            "/report-found-item",
            "/found-items",
            "/users/{custom_id}/found-items",
        ),
    ] {
        let item = format!("{collection}/{{id}}");
        dispatcher
            .route(Method::POST, create, move |ctx, req| {
                reports::create_report(ctx, req, kind)
            })?
            .route(Method::GET, collection, move |ctx, req| {
                reports::list_reports(ctx, req, kind)
            })?
            .route(Method::GET, &item, move |ctx, req| {
                reports::get_report(ctx, req, kind)
            })?
            .route(Method::DELETE, &item, move |ctx, req| {
                reports::delete_report(ctx, req, kind)
            })?
            .route(Method::GET, by_user, move |ctx, req| {
                reports::reports_by_user(ctx, req, kind)
            })?;
    }

    // Photo uploads
    dispatcher
        .route(Method::POST, "/upload/presign", uploads::presign)?
        .route(Method::POST, "/upload/confirm", uploads::confirm)?
        .route(Method::DELETE, "/upload/delete", uploads::delete)?;

    Ok(())
}

/// Build the application router.
///
/// Layers, outermost first:
/// - HTTP metrics, so every response is counted
/// - TraceLayer for request spans
/// - 30 second request timeout, answered with a 408 envelope
/// - preflight status rewrite to 204
/// - CORS, answering preflights before dispatch
///
/// # Errors
///
/// Returns `BuildError` if a route pattern or the CORS origin is invalid.
pub fn build_app(ctx: Arc<AppContext>) -> Result<Router, BuildError> {
    let origin = HeaderValue::from_str(&ctx.config.cors_allowed_origin)
        .map_err(|e| BuildError::CorsOrigin(e.to_string()))?;

    let mut dispatcher = Dispatcher::new(ctx.clone(), ctx.config.base_path.clone());
    register_routes(&mut dispatcher)?;
    tracing::info!(target: "rs.dispatch", routes = dispatcher.len(), "Routes registered");

    let dispatcher = Arc::new(dispatcher);

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Ok(Router::new()
        .fallback(move |request: Request| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request).await }
        })
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(middleware::from_fn_with_state(REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware)))
}
