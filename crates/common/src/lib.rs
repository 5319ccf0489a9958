//! Utilities shared across the TraceQ backend crates.

#![warn(clippy::pedantic)]

/// JWT helpers: size limit, header inspection, `iat` checks, key decoding
pub mod jwt;

/// Secret types that prevent accidental logging
pub mod secret;
