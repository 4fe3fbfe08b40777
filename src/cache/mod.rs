//! Per-user token cache store.
//!
//! A `CachedTokenBlob` exists only for an `oid` that has completed at least
//! one successful code exchange. The store is a three-operation collaborator
//! interface; the core passes blobs through it without inspecting their
//! internals; only the confidential client reads or mutates account records.

pub mod store;

pub use store::{MemoryTokenStore, RedbTokenStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token cache backend failure. Degrades to "silent acquisition unavailable"
/// rather than failing the request.
#[derive(Debug, Error)]
#[error("token cache backend error")]
pub struct CacheError(#[source] pub anyhow::Error);

/// Load/save/remove interface for one opaque token-cache blob per `oid`.
///
/// Concurrent silent acquisitions for the same `oid` race on `save` with
/// last-write-wins semantics. The blob is idempotent enough for that to be
/// acceptable; backends offering compare-and-swap may serialize per `oid`.
#[async_trait]
pub trait TokenCacheStore: Send + Sync {
    async fn load(&self, oid: &str) -> Result<Option<CachedTokenBlob>, CacheError>;
    async fn save(&self, oid: &str, blob: &CachedTokenBlob) -> Result<(), CacheError>;
    async fn remove(&self, oid: &str) -> Result<(), CacheError>;
}

/// Serialized token cache for one user.
///
/// Holds at most one account record by construction: one user, one
/// session-bound cache.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CachedTokenBlob {
    pub(crate) account: Option<AccountRecord>,
}

impl CachedTokenBlob {
    /// True when no account has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
    }
}

impl std::fmt::Debug for CachedTokenBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokenBlob")
            .field("account", &self.account.as_ref().map(|a| a.oid.as_str()))
            .finish()
    }
}

/// Tokens and metadata for one signed-in account.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct AccountRecord {
    /// Stable user identifier the blob is keyed by.
    pub oid: String,
    /// Last issued access token.
    pub access_token: String,
    /// Refresh token, when the provider granted one (`offline_access`).
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
    /// Scopes the access token was issued for.
    pub scopes: Vec<String>,
}

impl AccountRecord {
    /// True when the access token is still valid with the given skew margin.
    pub fn access_token_fresh(&self, skew_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(skew_secs) < self.expires_at
    }
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("oid", &self.oid)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}
