//! Error taxonomy for the authentication core.
//!
//! Every failure path resolves to one of four outcomes so callers can map
//! them to a redirect (web session flows) or a 401 (bearer flows) without
//! ever letting an unhandled error escape as a 500.

use thiserror::Error;

/// Authentication failures surfaced by this crate.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No valid session identity. Web callers redirect to a neutral page,
    /// API callers choose their own mapping. Never fatal.
    #[error("login required")]
    RequiresLogin,

    /// Bearer token missing, invalid, expired, or signed by an unknown key.
    /// Maps to HTTP 401 with a `WWW-Authenticate: Bearer` challenge.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The authorization-code exchange with the provider failed (bad code,
    /// state mismatch, network error). Recovered locally: the session stays
    /// anonymous and the user is sent back to a neutral page.
    #[error("authorization code exchange failed")]
    ExchangeFailed(#[source] anyhow::Error),

    /// Token cache store I/O failure. Treated as "silent acquisition
    /// unavailable", degrading to `RequiresLogin` rather than crashing.
    #[error("token cache unavailable")]
    CacheUnavailable(#[source] anyhow::Error),
}

impl AuthError {
    /// Value for the `WWW-Authenticate` response header on a 401.
    pub fn challenge(&self) -> &'static str {
        "Bearer"
    }

    /// True when the caller should send the user through interactive login
    /// rather than report a hard failure.
    pub fn requires_login(&self) -> bool {
        matches!(self, AuthError::RequiresLogin | AuthError::CacheUnavailable(_))
    }
}
