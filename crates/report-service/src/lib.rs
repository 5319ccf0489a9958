//! TraceQ Report Service Library
//!
//! Backend for a campus lost-and-found service: reporters file lost and
//! found item reports, attach photos through presigned uploads, and keep a
//! profile. Callers authenticate with identity provider tokens.
//!
//! # Architecture
//!
//! Every request passes through the same gateway before business logic:
//!
//! ```text
//! routes/mod.rs -> dispatch -> handlers/*.rs -> auth::AuthGateway
//!                                            -> repositories/*.rs, storage
//! ```
//!
//! # Modules
//!
//! - `auth` - Key set cache, token verification, provisioning, gateway
//! - `config` - Service configuration from environment
//! - `context` - Shared service context
//! - `dispatch` - Method and path routing with `{name}` placeholders
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `ids` - Public identifier and object key generation
//! - `middleware` - HTTP metrics middleware
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `repositories` - Postgres access
//! - `routes` - Route table and axum router setup
//! - `storage` - Object storage for uploaded photos

pub mod auth;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod ids;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod storage;
