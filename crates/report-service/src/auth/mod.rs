//! Request authentication.
//!
//! - [`key_set`]: cached provider signing keys
//! - [`claims`]: typed token claims
//! - [`verifier`]: signature and claim validation
//! - [`provisioner`]: identity to principal resolution
//! - [`gateway`]: the per-request entry point

pub mod claims;
pub mod gateway;
pub mod key_set;
pub mod provisioner;
pub mod verifier;

pub use claims::TokenClaims;
pub use gateway::{bearer_token, AuthError, AuthGateway};
pub use key_set::{Jwk, KeySet, KeySetCache, KeySetError};
pub use provisioner::{AdminAllowList, IdentityProvisioner, ProvisionError};
pub use verifier::{TokenError, TokenVerifier};
