//! JWKS (JSON Web Key Set) resolution and caching.
//!
//! Keys are resolved lazily: the discovery document is fetched once to learn
//! the `jwks_uri`, then the key set is fetched and memoized by `kid`. A `kid`
//! miss forces exactly one refresh before failing, so rotated keys become
//! verifiable without a process restart. Concurrent misses are collapsed into
//! a single in-flight fetch.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::AuthError;

/// JWKS response from the endpoint.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Individual JSON Web Key. Only the RSA parameters are used; the provider
/// publishes RSA signing keys.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (RSA expected)
    pub kty: String,
    /// Key ID
    pub kid: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA exponent (base64url)
    pub e: Option<String>,
}

/// Discovery document; only `jwks_uri` is read (no full validation).
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// Resolves signing keys by `kid`, with memoized discovery and key-set caches.
pub struct KeyResolver {
    /// HTTP client
    http_client: reqwest::Client,
    /// OpenID Connect discovery document URL
    metadata_url: String,
    /// Memoized `jwks_uri` from the discovery document
    jwks_uri: RwLock<Option<String>>,
    /// Cached keys: kid -> DecodingKey
    keys: RwLock<HashMap<String, DecodingKey>>,
    /// Serializes network fetches (single flight)
    fetch_lock: Mutex<()>,
    /// Bumped after every successful key-set fetch; lets queued callers skip
    /// a redundant refetch
    generation: AtomicU64,
}

impl KeyResolver {
    /// Create a resolver for the given discovery document URL.
    pub fn new(metadata_url: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            metadata_url,
            jwks_uri: RwLock::new(None),
            keys: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// The provider's JWKS endpoint, fetched from the discovery document and
    /// memoized until [`invalidate`](Self::invalidate) is called.
    pub async fn key_uri(&self) -> Result<String, AuthError> {
        if let Some(uri) = self.jwks_uri.read().await.clone() {
            return Ok(uri);
        }

        let _guard = self.fetch_lock.lock().await;
        self.key_uri_locked().await.map_err(unavailable)
    }

    /// Get a decoding key by key ID.
    ///
    /// On a miss the cache is refreshed exactly once (single flight across
    /// concurrent callers) and the lookup retried, covering provider key
    /// rotation. A `kid` still missing after the refresh is unauthorized.
    pub async fn key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let observed = self.generation.load(Ordering::Acquire);

        if let Some(key) = self.lookup(kid).await {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cache, refreshing JWKS");
        self.refresh_if_unchanged(observed).await?;

        self.lookup(kid).await.ok_or_else(|| {
            AuthError::Unauthorized(format!("unrecognized kid '{}' in token", kid))
        })
    }

    /// Drop both caches. The next lookup refetches discovery and keys. Safe
    /// to call concurrently with ongoing reads.
    pub async fn invalidate(&self) {
        self.keys.write().await.clear();
        *self.jwks_uri.write().await = None;
        debug!("JWKS caches invalidated");
    }

    async fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    /// Refresh the key set unless another caller already completed a refresh
    /// after `observed` was read.
    async fn refresh_if_unchanged(&self, observed: u64) -> Result<(), AuthError> {
        let _guard = self.fetch_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            // Another in-flight refresh landed while we were queued
            return Ok(());
        }

        self.fetch_keys_locked().await.map_err(unavailable)
    }

    /// Fetch `jwks_uri` from the discovery document. Caller holds `fetch_lock`.
    async fn key_uri_locked(&self) -> Result<String> {
        if let Some(uri) = self.jwks_uri.read().await.clone() {
            return Ok(uri);
        }

        debug!(url = %self.metadata_url, "Fetching discovery document");
        let response = self
            .http_client
            .get(&self.metadata_url)
            .send()
            .await
            .context("Failed to fetch discovery document")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "discovery endpoint returned status {}",
                response.status()
            ));
        }

        let doc: DiscoveryDocument = response
            .json()
            .await
            .context("Failed to parse discovery document")?;

        *self.jwks_uri.write().await = Some(doc.jwks_uri.clone());
        Ok(doc.jwks_uri)
    }

    /// Fetch and replace the key set. Caller holds `fetch_lock`.
    async fn fetch_keys_locked(&self) -> Result<()> {
        let jwks_url = self.key_uri_locked().await?;

        debug!(url = %jwks_url, "Fetching JWKS");
        let response = self
            .http_client
            .get(&jwks_url)
            .send()
            .await
            .context("Failed to fetch JWKS")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "JWKS endpoint returned status {}",
                response.status()
            ));
        }

        let jwks: Jwks = response.json().await.context("Failed to parse JWKS")?;

        let mut new_keys = HashMap::new();
        for jwk in jwks.keys {
            // Skip encryption keys
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }

            match jwk_to_decoding_key(&jwk) {
                Ok(key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    debug!(kid = %kid, kty = %jwk.kty, "Loaded JWK");
                    new_keys.insert(kid, key);
                }
                Err(e) => {
                    warn!(
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        error = %e,
                        "Failed to parse JWK, skipping"
                    );
                }
            }
        }

        if new_keys.is_empty() {
            return Err(anyhow!("No valid signing keys found in JWKS"));
        }

        let key_count = new_keys.len();
        *self.keys.write().await = new_keys;
        self.generation.fetch_add(1, Ordering::Release);

        info!(url = %jwks_url, key_count, "JWKS cache refreshed");
        Ok(())
    }
}

/// Convert an RSA JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_ref().ok_or_else(|| anyhow!("RSA key missing 'n'"))?;
            let e = jwk.e.as_ref().ok_or_else(|| anyhow!("RSA key missing 'e'"))?;

            DecodingKey::from_rsa_components(n, e).context("Failed to create RSA DecodingKey")
        }
        kty => Err(anyhow!("Unsupported key type: {}", kty)),
    }
}

/// Upstream unavailability surfaces as `Unauthorized`, not as a distinct
/// outage signal; retries are at the caller's discretion.
fn unavailable(e: anyhow::Error) -> AuthError {
    AuthError::Unauthorized(format!("unable to load signing keys: {:#}", e))
}
