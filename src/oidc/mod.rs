//! Bearer-token verification against the provider's published signing keys.
//!
//! `KeyResolver` fetches and caches the JWKS (with single-flight refresh and
//! rotation-aware retry); `BearerTokenVerifier` runs the full validation
//! pipeline: issuer, signature, audience, and time-based claims.

pub mod jwks;
pub mod verifier;

pub use jwks::KeyResolver;
pub use verifier::{Audience, BearerTokenVerifier, VerifiedClaims};
