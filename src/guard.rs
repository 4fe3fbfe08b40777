//! Request-scoped identity resolution.
//!
//! A guard answers "who is this request from, and may it proceed" from the
//! decoded session, optionally backed by a freshly acquired and re-verified
//! access token. Guards hold no per-request state and can be shared across
//! requests.

use std::sync::Arc;
use tracing::debug;

use crate::error::AuthError;
use crate::flow::TokenResult;
use crate::oidc::{BearerTokenVerifier, VerifiedClaims};
use crate::session::SessionData;
use crate::silent::SilentTokenAcquirer;

/// The minimal proof of a completed login: the stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub oid: String,
}

/// Identity plus whatever the guard's strategy attached to it.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub oid: String,
    /// Access token, when the guard was configured to acquire one.
    pub token: Option<TokenResult>,
    /// Claims of the verified access token, when one was acquired.
    pub claims: Option<VerifiedClaims>,
}

/// Why a request resolved as unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// The session carries no user marker.
    NoSessionIdentity,
    /// The session names a user but no usable cached token exists.
    NoCachedToken,
    /// A token was acquired but failed verification.
    TokenRejected,
    /// The token cache backend could not be reached.
    CacheUnavailable,
}

/// Outcome of resolving a request's identity.
#[derive(Debug)]
pub enum IdentityOutcome {
    Authenticated(ResolvedIdentity),
    Unauthenticated(UnauthenticatedReason),
}

enum Strategy {
    /// Trust the session marker alone.
    SessionOnly,
    /// Require a silently acquired access token, re-verified against the
    /// provider's published keys before it is handed to the caller.
    VerifiedToken {
        acquirer: Arc<SilentTokenAcquirer>,
        verifier: Arc<BearerTokenVerifier>,
        scopes: Vec<String>,
    },
}

/// Resolves a session into an identity according to a configured strategy.
pub struct SessionIdentityGuard {
    strategy: Strategy,
    /// When set, `resolve` turns an unauthenticated outcome into
    /// `AuthError::RequiresLogin` instead of `Ok(None)`.
    auto_error: bool,
}

impl SessionIdentityGuard {
    /// Guard that accepts any session with a user marker.
    pub fn session_only(auto_error: bool) -> Self {
        Self {
            strategy: Strategy::SessionOnly,
            auto_error,
        }
    }

    /// Guard that additionally requires a fresh, verified access token
    /// covering `scopes`.
    pub fn with_verified_token(
        acquirer: Arc<SilentTokenAcquirer>,
        verifier: Arc<BearerTokenVerifier>,
        scopes: Vec<String>,
        auto_error: bool,
    ) -> Self {
        Self {
            strategy: Strategy::VerifiedToken {
                acquirer,
                verifier,
                scopes,
            },
            auto_error,
        }
    }

    /// Resolve the session into an identity outcome.
    pub async fn resolve_outcome(&self, session: &SessionData) -> IdentityOutcome {
        let Some(oid) = session.user.as_deref() else {
            return IdentityOutcome::Unauthenticated(UnauthenticatedReason::NoSessionIdentity);
        };

        match &self.strategy {
            Strategy::SessionOnly => IdentityOutcome::Authenticated(ResolvedIdentity {
                oid: oid.to_string(),
                token: None,
                claims: None,
            }),
            Strategy::VerifiedToken {
                acquirer,
                verifier,
                scopes,
            } => {
                let token = match acquirer.acquire(oid, scopes).await {
                    Ok(Some(token)) => token,
                    Ok(None) => {
                        debug!("Session user has no silently acquirable token");
                        return IdentityOutcome::Unauthenticated(
                            UnauthenticatedReason::NoCachedToken,
                        );
                    }
                    Err(AuthError::CacheUnavailable(_)) => {
                        return IdentityOutcome::Unauthenticated(
                            UnauthenticatedReason::CacheUnavailable,
                        );
                    }
                    Err(_) => {
                        return IdentityOutcome::Unauthenticated(
                            UnauthenticatedReason::NoCachedToken,
                        );
                    }
                };

                // A cached or refreshed token is never trusted on provenance
                // alone
                let Some(claims) = verifier.verify_optional(&token.access_token).await else {
                    return IdentityOutcome::Unauthenticated(UnauthenticatedReason::TokenRejected);
                };

                IdentityOutcome::Authenticated(ResolvedIdentity {
                    oid: oid.to_string(),
                    token: Some(token),
                    claims: Some(claims),
                })
            }
        }
    }

    /// Resolve and apply the `auto_error` policy: unauthenticated becomes
    /// `Err(RequiresLogin)` when set, `Ok(None)` otherwise.
    pub async fn resolve(
        &self,
        session: &SessionData,
    ) -> Result<Option<ResolvedIdentity>, AuthError> {
        match self.resolve_outcome(session).await {
            IdentityOutcome::Authenticated(identity) => Ok(Some(identity)),
            IdentityOutcome::Unauthenticated(reason) => {
                debug!(?reason, "Request resolved unauthenticated");
                if self.auto_error {
                    Err(AuthError::RequiresLogin)
                } else {
                    Ok(None)
                }
            }
        }
    }
}
