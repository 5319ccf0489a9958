//! # Report Service Test Utilities
//!
//! Shared test utilities for the report service.
//!
//! This crate provides:
//! - Deterministic signing keys (RSA and Ed25519) and their JWKs
//! - `TestTokenBuilder` for signed identity tokens
//! - `MockKeySource`, a wiremock-backed key set endpoint
//! - In-memory identity and object stores for database-free tests
//! - `TestReportServer` for end-to-end tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use report_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .for_user("firebase-uid-1")
//!         .with_email("ada@example.edu")
//!         .sign();
//! }
//! ```

pub mod crypto_fixtures;
pub mod key_source;
pub mod memory_stores;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use key_source::*;
pub use memory_stores::*;
pub use server_harness::*;
pub use token_builders::*;
