//! Silent token acquisition for an already signed-in user.
//!
//! Bridges the token cache store and the confidential client: load the
//! user's blob, let the client reuse or refresh, persist the mutated blob.
//! `Ok(None)` uniformly means "interactive login required"; only a cache
//! backend outage is a hard error.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::TokenCacheStore;
use crate::error::AuthError;
use crate::flow::{ConfidentialClient, TokenResult};

/// Acquires access tokens for a signed-in `oid` without user interaction.
pub struct SilentTokenAcquirer {
    store: Arc<dyn TokenCacheStore>,
    client: ConfidentialClient,
}

impl SilentTokenAcquirer {
    pub fn new(store: Arc<dyn TokenCacheStore>, client: ConfidentialClient) -> Self {
        Self { store, client }
    }

    /// Acquire an access token covering `scopes` for `oid`.
    ///
    /// A failed refresh (revoked grant, expired refresh token, provider
    /// outage) degrades to `Ok(None)` so the caller can route the user back
    /// through interactive login. A save-back failure is logged but does not
    /// discard the token already in hand.
    pub async fn acquire(
        &self,
        oid: &str,
        scopes: &[String],
    ) -> Result<Option<TokenResult>, AuthError> {
        let blob = self
            .store
            .load(oid)
            .await
            .map_err(|e| AuthError::CacheUnavailable(e.0))?;

        let Some(mut blob) = blob else {
            debug!("No token cache entry, interactive login required");
            return Ok(None);
        };
        if blob.is_empty() {
            return Ok(None);
        }

        let result = match self.client.acquire_token_silent(&mut blob, scopes).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Silent token acquisition failed");
                return Ok(None);
            }
        };

        if result.is_some() {
            if let Err(e) = self.store.save(oid, &blob).await {
                warn!(error = %e, "Failed to persist refreshed token cache entry");
            }
        }

        Ok(result)
    }
}
