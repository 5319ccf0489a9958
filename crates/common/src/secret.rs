//! Secret wrappers for values that must never reach logs.
//!
//! Re-exports [`secrecy`] types. Wrap database URLs, bearer tokens and
//! verification secrets in [`SecretString`] so that any `Debug` derive on a
//! containing struct prints a redaction marker instead of the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("postgresql://user:pass@db/traceq");
//! assert!(!format!("{url:?}").contains("pass"));
//! assert!(url.expose_secret().starts_with("postgresql://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
