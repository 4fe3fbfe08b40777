//! Confidential-client token operations.
//!
//! The single place that talks to the provider's authorize/token endpoints
//! and the only code that reads or mutates token-cache account records.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::state::FlowState;
use crate::cache::{AccountRecord, CachedTokenBlob};
use crate::config::ProviderSettings;

/// Scopes every flow requests in addition to the configured ones; required
/// for an ID token and a refresh token.
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Margin under which a cached access token is refreshed rather than reused.
const REFRESH_SKEW_SECS: i64 = 120;

/// A usable access token and its metadata.
#[derive(Clone)]
pub struct TokenResult {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResult")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Wire response from the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error body from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Confidential client for one registered application.
#[derive(Clone)]
pub struct ConfidentialClient {
    settings: Arc<ProviderSettings>,
    http_client: reqwest::Client,
}

impl ConfidentialClient {
    pub fn new(settings: Arc<ProviderSettings>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// Begin an authorization-code flow: mint state/nonce/PKCE material and
    /// build the provider's authorize URL. No network call is made.
    pub fn initiate_auth_code_flow(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> (FlowState, String) {
        let state = random_urlsafe(32);
        let nonce = random_urlsafe(32);
        let code_verifier = random_urlsafe(48);
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));

        let scope = join_scopes(scopes);
        let client_id = self.settings.client_id.to_string();
        let params = [
            ("client_id", client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
            ("nonce", nonce.as_str()),
            ("code_challenge", code_challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];

        // Infallible: the params are all strings
        let query = serde_urlencoded::to_string(params).unwrap_or_default();
        let auth_uri = format!("{}?{}", self.settings.authorize_endpoint(), query);

        let flow = FlowState {
            state,
            nonce,
            code_verifier,
            redirect_uri: redirect_uri.to_string(),
            created_at: Utc::now(),
        };

        (flow, auth_uri)
    }

    /// Redeem the callback for tokens.
    ///
    /// Fails closed on provider error responses, a `state` mismatch, or a
    /// missing code, all before any network call for the latter two.
    pub(crate) async fn redeem_auth_code(
        &self,
        flow: &FlowState,
        params: &HashMap<String, String>,
    ) -> Result<TokenResponse> {
        if let Some(error) = params.get("error") {
            bail!(
                "provider returned error '{}': {}",
                error,
                params
                    .get("error_description")
                    .map(String::as_str)
                    .unwrap_or("no description")
            );
        }

        let returned_state = params
            .get("state")
            .ok_or_else(|| anyhow!("callback missing state parameter"))?;
        if *returned_state != flow.state {
            bail!("state mismatch between session flow and callback");
        }

        let code = params
            .get("code")
            .ok_or_else(|| anyhow!("callback missing authorization code"))?;

        let scope = join_scopes(&self.settings.scopes);
        let client_id = self.settings.client_id.to_string();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", flow.redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code_verifier", flow.code_verifier.as_str()),
            ("scope", scope.as_str()),
        ];

        self.post_token_request(&form).await
    }

    /// Silent acquisition from a cached blob: reuse an unexpired access
    /// token, else redeem the refresh token and update the blob in place.
    /// `Ok(None)` means interactive login is required.
    pub(crate) async fn acquire_token_silent(
        &self,
        blob: &mut CachedTokenBlob,
        scopes: &[String],
    ) -> Result<Option<TokenResult>> {
        let Some(account) = blob.account.as_ref() else {
            return Ok(None);
        };

        let wants_covered = scopes.iter().all(|s| account.scopes.contains(s));
        if wants_covered && account.access_token_fresh(REFRESH_SKEW_SECS) {
            debug!("Reusing cached access token");
            return Ok(Some(token_result_from(account)));
        }

        let Some(refresh_token) = account.refresh_token.clone() else {
            debug!("No refresh token in cache, interactive login required");
            return Ok(None);
        };

        let scope = join_scopes(scopes);
        let client_id = self.settings.client_id.to_string();
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self.post_token_request(&form).await?;
        let oid = account.oid.clone();
        let record = self.account_record(&oid, &response, Some(refresh_token));
        let result = token_result_from(&record);
        blob.account = Some(record);

        debug!("Access token refreshed silently");
        Ok(Some(result))
    }

    /// Build the cache account record for a redeemed token response.
    pub(crate) fn cache_blob(&self, oid: &str, response: &TokenResponse) -> CachedTokenBlob {
        CachedTokenBlob {
            account: Some(self.account_record(oid, response, None)),
        }
    }

    fn account_record(
        &self,
        oid: &str,
        response: &TokenResponse,
        previous_refresh_token: Option<String>,
    ) -> AccountRecord {
        AccountRecord {
            oid: oid.to_string(),
            access_token: response.access_token.clone(),
            // Providers may rotate the refresh token on use; keep the old
            // one when no replacement was issued
            refresh_token: response.refresh_token.clone().or(previous_refresh_token),
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in as i64),
            scopes: response
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_else(|| self.settings.scopes.clone()),
        }
    }

    async fn post_token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(self.settings.token_endpoint())
            .form(form)
            .send()
            .await
            .context("Failed to reach token endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                warn!(error = %err.error, "Token endpoint rejected request");
                bail!(
                    "token endpoint returned '{}': {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                );
            }
            bail!("token endpoint returned status {}", status);
        }

        response
            .json::<TokenResponse>()
            .await
            .context("Failed to parse token response")
    }
}

fn token_result_from(account: &AccountRecord) -> TokenResult {
    TokenResult {
        access_token: account.access_token.clone(),
        token_type: "Bearer".to_string(),
        expires_at: account.expires_at,
        scopes: account.scopes.clone(),
    }
}

/// Reserved scopes plus the configured ones, deduplicated, order preserved.
fn join_scopes(scopes: &[String]) -> String {
    let mut all: Vec<&str> = RESERVED_SCOPES.to_vec();
    for scope in scopes {
        if !all.contains(&scope.as_str()) {
            all.push(scope);
        }
    }
    all.join(" ")
}

/// URL-safe random string from `len` bytes of entropy.
fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_settings;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(uri: &str) -> ConfidentialClient {
        ConfidentialClient::new(Arc::new(test_settings(uri))).unwrap()
    }

    fn callback_params(flow: &FlowState, code: &str) -> HashMap<String, String> {
        HashMap::from([
            ("state".to_string(), flow.state.clone()),
            ("code".to_string(), code.to_string()),
        ])
    }

    #[test]
    fn test_initiate_builds_authorize_url() {
        let client = client_for("http://localhost:9999");
        let (flow, auth_uri) =
            client.initiate_auth_code_flow(&["User.Read".to_string()], "http://localhost/cb");

        assert!(auth_uri.contains("/oauth2/v2.0/authorize?"));
        assert!(auth_uri.contains(&format!("state={}", flow.state)));
        assert!(auth_uri.contains("code_challenge_method=S256"));
        assert!(auth_uri.contains("response_type=code"));
        // Reserved scopes always requested
        assert!(auth_uri.contains("openid"));
        assert!(auth_uri.contains("offline_access"));
        assert_eq!(flow.redirect_uri, "http://localhost/cb");
    }

    #[test]
    fn test_initiate_mints_fresh_entropy_per_flow() {
        let client = client_for("http://localhost:9999");
        let (a, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");
        let (b, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");
        assert_ne!(a.state, b.state);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.code_verifier, b.code_verifier);
        // PKCE verifier length within RFC 7636 bounds (43..=128)
        assert!(a.code_verifier.len() >= 43 && a.code_verifier.len() <= 128);
    }

    #[tokio::test]
    async fn test_redeem_rejects_state_mismatch_without_network() {
        let server = MockServer::start().await;
        let client = client_for(&server.uri());
        let (flow, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");

        let mut params = callback_params(&flow, "code-1");
        params.insert("state".to_string(), "forged-state".to_string());

        let err = client.redeem_auth_code(&flow, &params).await.unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redeem_surfaces_provider_error() {
        let server = MockServer::start().await;
        let client = client_for(&server.uri());
        let (flow, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");

        let params = HashMap::from([
            ("error".to_string(), "access_denied".to_string()),
            (
                "error_description".to_string(),
                "user cancelled".to_string(),
            ),
        ]);

        let err = client.redeem_auth_code(&flow, &params).await.unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn test_redeem_posts_code_and_verifier() {
        let server = MockServer::start().await;
        let settings = test_settings(&server.uri());
        let client = ConfidentialClient::new(Arc::new(settings.clone())).unwrap();
        let (flow, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");

        Mock::given(method("POST"))
            .and(path(format!("/{}/oauth2/v2.0/token", settings.tenant_id)))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1",
                "id_token": "idt-1",
                "scope": "openid profile User.Read"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let params = callback_params(&flow, "the-code");
        let response = client.redeem_auth_code(&flow, &params).await.unwrap();
        assert_eq!(response.access_token, "at-1");
        assert_eq!(response.id_token.as_deref(), Some("idt-1"));

        let blob = client.cache_blob("oid-123", &response);
        let account = blob.account.unwrap();
        assert_eq!(account.oid, "oid-123");
        assert_eq!(account.refresh_token.as_deref(), Some("rt-1"));
        assert!(account.scopes.contains(&"User.Read".to_string()));
    }

    #[tokio::test]
    async fn test_redeem_maps_token_endpoint_error_body() {
        let server = MockServer::start().await;
        let client = client_for(&server.uri());
        let (flow, _) = client.initiate_auth_code_flow(&[], "http://localhost/cb");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: expired code"
            })))
            .mount(&server)
            .await;

        let params = callback_params(&flow, "stale-code");
        let err = client.redeem_auth_code(&flow, &params).await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_silent_reuses_fresh_token_without_network() {
        let server = MockServer::start().await;
        let settings = test_settings(&server.uri());
        let client = ConfidentialClient::new(Arc::new(settings)).unwrap();

        let mut blob = CachedTokenBlob {
            account: Some(AccountRecord {
                oid: "oid-123".to_string(),
                access_token: "cached-at".to_string(),
                refresh_token: Some("rt".to_string()),
                expires_at: Utc::now() + chrono::Duration::seconds(3600),
                scopes: vec!["User.Read".to_string()],
            }),
        };

        let result = client
            .acquire_token_silent(&mut blob, &["User.Read".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.access_token, "cached-at");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silent_refreshes_expired_token_and_mutates_blob() {
        let server = MockServer::start().await;
        let settings = test_settings(&server.uri());
        let client = ConfidentialClient::new(Arc::new(settings.clone())).unwrap();

        Mock::given(method("POST"))
            .and(path(format!("/{}/oauth2/v2.0/token", settings.tenant_id)))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-new",
                "scope": "openid User.Read"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut blob = CachedTokenBlob {
            account: Some(AccountRecord {
                oid: "oid-123".to_string(),
                access_token: "at-stale".to_string(),
                refresh_token: Some("rt-old".to_string()),
                expires_at: Utc::now() - chrono::Duration::seconds(60),
                scopes: vec!["User.Read".to_string()],
            }),
        };

        let result = client
            .acquire_token_silent(&mut blob, &["User.Read".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.access_token, "at-new");

        let account = blob.account.unwrap();
        assert_eq!(account.access_token, "at-new");
        assert_eq!(account.refresh_token.as_deref(), Some("rt-new"));
        assert_eq!(account.oid, "oid-123");
    }

    #[tokio::test]
    async fn test_silent_without_account_or_refresh_token() {
        let server = MockServer::start().await;
        let client = client_for(&server.uri());

        let mut empty = CachedTokenBlob::default();
        assert!(client
            .acquire_token_silent(&mut empty, &[])
            .await
            .unwrap()
            .is_none());

        let mut no_refresh = CachedTokenBlob {
            account: Some(AccountRecord {
                oid: "oid-123".to_string(),
                access_token: "at-stale".to_string(),
                refresh_token: None,
                expires_at: Utc::now() - chrono::Duration::seconds(60),
                scopes: vec![],
            }),
        };
        assert!(client
            .acquire_token_silent(&mut no_refresh, &[])
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_join_scopes_deduplicates() {
        let joined = join_scopes(&["openid".to_string(), "User.Read".to_string()]);
        assert_eq!(joined, "openid profile offline_access User.Read");
    }
}
