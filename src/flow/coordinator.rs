//! Web login lifecycle.
//!
//! Drives one user from anonymous through a pending flow to authenticated
//! and back. A failed callback exchange discards the pending flow and
//! returns the session to `Anonymous` without ever partially committing an
//! identity: the session's `user` marker and the token cache are written
//! only after the exchange, ID-token verification, and blob save all
//! succeed.

use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::ConfidentialClient;
use crate::cache::TokenCacheStore;
use crate::config::ProviderSettings;
use crate::error::AuthError;
use crate::guard::UserIdentity;
use crate::oidc::BearerTokenVerifier;
use crate::session::SessionData;

/// Coordinates redirect construction, callback exchange, and logout.
pub struct AuthCodeFlow {
    settings: Arc<ProviderSettings>,
    client: ConfidentialClient,
    store: Arc<dyn TokenCacheStore>,
    verifier: Arc<BearerTokenVerifier>,
}

impl AuthCodeFlow {
    pub fn new(
        settings: Arc<ProviderSettings>,
        client: ConfidentialClient,
        store: Arc<dyn TokenCacheStore>,
        verifier: Arc<BearerTokenVerifier>,
    ) -> Self {
        Self {
            settings,
            client,
            store,
            verifier,
        }
    }

    /// Begin a login: store flow state in the session and return the
    /// provider's authorize URL for a 302 redirect.
    ///
    /// `callback_url` is the absolute URL of the callback route as seen by
    /// the current request; loopback hosts are normalized to `localhost`
    /// because the provider compares redirect URIs by string equality.
    pub fn start_login(&self, session: &mut SessionData, callback_url: &str) -> String {
        let redirect_uri = normalize_loopback(callback_url);
        let (flow, auth_uri) = self
            .client
            .initiate_auth_code_flow(&self.settings.scopes, &redirect_uri);

        debug!(state = %flow.state, "Initiated authorization code flow");
        session.set_flow(flow);
        auth_uri
    }

    /// Complete a login from the provider's callback.
    ///
    /// The pending flow state is consumed unconditionally, so a second
    /// callback finds no flow and fails closed. The ID
    /// token is run through the full bearer-verification path (a freshly
    /// minted token is not special-cased as trusted) and its nonce must
    /// match the one minted at `start_login`.
    pub async fn complete_login(
        &self,
        session: &mut SessionData,
        query_params: &HashMap<String, String>,
    ) -> Result<UserIdentity, AuthError> {
        let flow = session
            .take_flow()
            .ok_or_else(|| AuthError::ExchangeFailed(anyhow!("no pending login flow in session")))?;

        let response = self
            .client
            .redeem_auth_code(&flow, query_params)
            .await
            .map_err(AuthError::ExchangeFailed)?;

        let id_token = response
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::ExchangeFailed(anyhow!("token response missing id_token")))?;

        let claims = self
            .verifier
            .verify(id_token)
            .await
            .map_err(|e| AuthError::ExchangeFailed(anyhow!("id token rejected: {}", e)))?;

        if claims.nonce.as_deref() != Some(flow.nonce.as_str()) {
            return Err(AuthError::ExchangeFailed(anyhow!(
                "nonce mismatch between flow and id token"
            )));
        }

        let oid = claims
            .subject()
            .ok_or_else(|| AuthError::ExchangeFailed(anyhow!("id token missing oid/sub claim")))?
            .to_string();

        // Persist the blob before stamping the session so a cache outage
        // never yields an identity with no token cache behind it
        let blob = self.client.cache_blob(&oid, &response);
        self.store
            .save(&oid, &blob)
            .await
            .map_err(|e| AuthError::CacheUnavailable(e.0))?;

        session.set_user(oid.clone());
        info!("Login completed");
        Ok(UserIdentity { oid })
    }

    /// Local logout: drop the cached tokens and clear the session identity.
    /// Does not sign the user out at the provider. Idempotent.
    pub async fn logout(&self, session: &mut SessionData, identity: Option<&UserIdentity>) {
        if let Some(identity) = identity {
            if let Err(e) = self.store.remove(&identity.oid).await {
                warn!(error = %e, "Failed to remove token cache entry on logout");
            }
        }

        session.clear_user();
    }
}

/// Normalize loopback hosts to `localhost` so the callback URL matches the
/// redirect URI registered with the provider.
fn normalize_loopback(url: &str) -> String {
    url.replace("http://0.0.0.0", "http://localhost")
        .replace("http://127.0.0.1", "http://localhost")
}
