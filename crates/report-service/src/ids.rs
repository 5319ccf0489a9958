//! Public identifier and object key generation.
//!
//! All randomness comes from `ring::rand::SystemRandom`.

use crate::models::ReportKind;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("system random number generator failed")]
pub struct RandomError;

/// `n` random bytes as uppercase hex.
///
/// # Errors
///
/// Returns `RandomError` if the system CSPRNG fails.
pub fn random_hex_upper(n: usize) -> Result<String, RandomError> {
    let mut bytes = vec![0u8; n];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| RandomError)?;
    Ok(hex::encode_upper(bytes))
}

/// Public principal id: `U` followed by 10 uppercase hex characters.
///
/// # Errors
///
/// Returns `RandomError` if the system CSPRNG fails.
pub fn principal_custom_id() -> Result<String, RandomError> {
    Ok(format!("U{}", random_hex_upper(5)?))
}

/// Public report id: kind prefix, `YYMM`, then 6 uppercase hex characters,
/// e.g. `L2509A1B2C3`.
///
/// # Errors
///
/// Returns `RandomError` if the system CSPRNG fails.
pub fn report_custom_id(kind: ReportKind, now: DateTime<Utc>) -> Result<String, RandomError> {
    Ok(format!(
        "{}{}{}",
        kind.id_prefix(),
        now.format("%y%m"),
        random_hex_upper(3)?
    ))
}

/// Lowercase hex suffix for object keys.
///
/// # Errors
///
/// Returns `RandomError` if the system CSPRNG fails.
pub fn object_key_token() -> Result<String, RandomError> {
    random_hex_upper(8).map(|s| s.to_ascii_lowercase())
}
