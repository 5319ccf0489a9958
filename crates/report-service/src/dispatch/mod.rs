//! Method and path routing.
//!
//! The [`Dispatcher`] is mounted as the fallback of an otherwise empty axum
//! `Router`, so it sees every request after the tower layers. Resolution is
//! two-pass:
//!
//! 1. Exact: the first route (registration order) whose method matches and
//!    whose pattern text equals the path.
//! 2. Pattern: only if no exact match exists, the first route whose method
//!    matches and whose placeholders match the path.
//!
//! Anything else is a 404 envelope and no handler runs.

pub mod pattern;

use crate::errors::ApiError;
use axum::body::Bytes;
use axum::extract::{Query, Request};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use pattern::{PathParams, PathPattern, RouteError};

/// Largest request body the dispatcher buffers.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Route pattern a response was produced by, for metrics labels.
#[derive(Debug, Clone)]
pub struct MatchedRoute(pub Arc<str>);

/// Everything a handler gets from the request.
#[derive(Debug)]
pub struct DispatchRequest {
    pub method: Method,
    /// Path after base-path stripping and normalization.
    pub path: String,
    pub params: PathParams,
    pub headers: HeaderMap,
    uri: Uri,
    body: Bytes,
}

impl DispatchRequest {
    /// A captured placeholder value.
    ///
    /// # Errors
    ///
    /// Returns 404 if the route has no such placeholder.
    pub fn param(&self, name: &str) -> Result<&str, ApiError> {
        self.params.get(name).ok_or_else(ApiError::route_not_found)
    }

    /// Deserialize the JSON body. An empty body reads as `{}`.
    ///
    /// # Errors
    ///
    /// Returns 400 `invalid_json` for a body that is not valid JSON of the
    /// expected shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest {
            code: "invalid_json",
            message: e.to_string(),
        })
    }

    /// Deserialize the query string.
    ///
    /// # Errors
    ///
    /// Returns 400 `invalid_query` if it does not fit `T`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Query::<T>::try_from_uri(&self.uri)
            .map(|Query(q)| q)
            .map_err(|e| ApiError::BadRequest {
                code: "invalid_query",
                message: e.body_text(),
            })
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
type BoxedHandler<S> = Arc<dyn Fn(S, DispatchRequest) -> BoxFuture + Send + Sync>;

struct Route<S> {
    method: Method,
    pattern: PathPattern,
    label: Arc<str>,
    handler: BoxedHandler<S>,
}

/// Registered routes plus the state handed to every handler.
pub struct Dispatcher<S> {
    state: S,
    base_path: String,
    routes: Vec<Route<S>>,
}

impl<S> Dispatcher<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// `base_path` is stripped from incoming paths before matching.
    pub fn new(state: S, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        Self {
            state,
            base_path: base_path.trim_end_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    /// Register `handler` for `method` and `pattern`. Registration order is
    /// match priority.
    ///
    /// # Errors
    ///
    /// Returns `RouteError` if the pattern does not compile.
    pub fn route<F, Fut, R>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, RouteError>
    where
        F: Fn(S, DispatchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        let compiled = PathPattern::compile(pattern)?;
        let handler: BoxedHandler<S> = Arc::new(move |state, request| {
            let fut = handler(state, request);
            Box::pin(async move { fut.await.into_response() })
        });

        self.routes.push(Route {
            method,
            label: Arc::from(compiled.as_str()),
            pattern: compiled,
            handler,
        });
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Path as seen by the route table: base path removed at a segment
    /// boundary and a single leading slash ensured. Query is not part of it.
    #[must_use]
    pub fn normalize_path(&self, raw_path: &str) -> String {
        let mut path = raw_path;
        if !self.base_path.is_empty() {
            if let Some(rest) = path.strip_prefix(self.base_path.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest;
                }
            }
        }
        format!("/{}", path.trim_start_matches('/'))
    }

    /// Resolve `method` and a normalized `path` to a route index and its
    /// captured parameters.
    fn resolve(&self, method: &Method, path: &str) -> Option<(usize, PathParams)> {
        let candidates = || {
            self.routes
                .iter()
                .enumerate()
                .filter(move |(_, r)| r.method == *method)
        };

        if let Some((index, _)) = candidates().find(|(_, r)| r.pattern.matches_exact(path)) {
            return Some((index, PathParams::default()));
        }

        candidates().find_map(|(index, r)| r.pattern.captures(path).map(|p| (index, p)))
    }

    /// Route `request` and run the matched handler.
    pub async fn dispatch(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let path = self.normalize_path(parts.uri.path());

        let Some((index, params)) = self.resolve(&parts.method, &path) else {
            tracing::debug!(
                target: "rs.dispatch",
                method = %parts.method,
                path = %path,
                "No route matched"
            );
            return ApiError::route_not_found().into_response();
        };
        let Some(route) = self.routes.get(index) else {
            return ApiError::Internal.into_response();
        };

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(target: "rs.dispatch", error = %e, "Failed to read request body");
                let mut response = ApiError::BadRequest {
                    code: "invalid_body",
                    message: "Request body could not be read".to_string(),
                }
                .into_response();
                response.extensions_mut().insert(MatchedRoute(route.label.clone()));
                return response;
            }
        };

        let request = DispatchRequest {
            method: parts.method,
            path,
            params,
            headers: parts.headers,
            uri: parts.uri,
            body,
        };

        let mut response = (route.handler)(self.state.clone(), request).await;
        response
            .extensions_mut()
            .insert(MatchedRoute(route.label.clone()));
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn dispatcher(base: &str) -> Dispatcher<()> {
        Dispatcher::new((), base)
    }

    #[test]
    fn test_normalize_path() {
        let d = dispatcher("/traceq-backend/public/");

        assert_eq!(d.normalize_path("/traceq-backend/public/me"), "/me");
        assert_eq!(d.normalize_path("/traceq-backend/public"), "/");
        assert_eq!(d.normalize_path("/traceq-backend/publicity"), "/traceq-backend/publicity");
        assert_eq!(d.normalize_path("//me"), "/me");

        let d = dispatcher("");
        assert_eq!(d.normalize_path("lost-items"), "/lost-items");
        assert_eq!(d.normalize_path("/lost-items/"), "/lost-items/");
    }

    #[test]
    fn test_resolve_prefers_exact_over_earlier_pattern() {
        let mut d = dispatcher("");
        d.route(Method::GET, "/items/{id}", |_, _| async { "pattern" })
            .unwrap()
            .route(Method::GET, "/items/new", |_, _| async { "exact" })
            .unwrap();

        let (index, params) = d.resolve(&Method::GET, "/items/new").unwrap();
        assert_eq!(index, 1);
        assert!(params.is_empty());

        let (index, params) = d.resolve(&Method::GET, "/items/7").unwrap();
        assert_eq!(index, 0);
        assert_eq!(params.get("id"), Some("7"));
    }

    #[test]
    fn test_resolve_respects_method() {
        let mut d = dispatcher("");
        d.route(Method::DELETE, "/items/{id}", |_, _| async { "delete" })
            .unwrap();

        assert!(d.resolve(&Method::GET, "/items/7").is_none());
        assert!(d.resolve(&Method::DELETE, "/items/7").is_some());
    }

    #[test]
    fn test_route_rejects_bad_pattern() {
        let mut d = dispatcher("");
        assert!(d.route(Method::GET, "/items/{id", |_, _| async { "" }).is_err());
        assert!(d.is_empty());
    }
}
