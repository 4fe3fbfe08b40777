//! Authentication core for web applications fronting the Microsoft identity
//! platform.
//!
//! Implements the OpenID Connect authorization code flow for a confidential
//! client: interactive login with PKCE and nonce binding, signed session
//! payloads, a per-user token cache with silent refresh, JWKS-backed bearer
//! token verification, and request guards that tie these together.
//!
//! The crate is framework-agnostic. A web layer supplies the session cookie
//! transport and callback routing; everything else (state machines, token
//! handling, verification) lives here.

pub mod cache;
pub mod config;
pub mod error;
pub mod flow;
pub mod guard;
pub mod oidc;
pub mod session;
pub mod silent;

pub use cache::{CacheError, CachedTokenBlob, MemoryTokenStore, RedbTokenStore, TokenCacheStore};
pub use config::ProviderSettings;
pub use error::AuthError;
pub use flow::{AuthCodeFlow, ConfidentialClient, FlowState, TokenResult};
pub use guard::{
    IdentityOutcome, ResolvedIdentity, SessionIdentityGuard, UnauthenticatedReason, UserIdentity,
};
pub use oidc::{BearerTokenVerifier, KeyResolver, VerifiedClaims};
pub use session::{build_set_cookie, SessionCodec, SessionData, SESSION_COOKIE_NAME};
pub use silent::SilentTokenAcquirer;
