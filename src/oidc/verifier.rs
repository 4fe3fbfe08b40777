//! Bearer token verification.
//!
//! State-free per call. Each step is a hard gate, ordered so that no
//! cryptographic or network work happens for tokens that could never
//! validate: empty token, header parse, issuer equality, key resolution,
//! then signature/audience/time checks.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::jwks::KeyResolver;
use crate::config::ProviderSettings;
use crate::error::AuthError;

/// Clock skew tolerance in seconds for exp/nbf validation.
const DEFAULT_LEEWAY_SECS: u64 = 30;

/// Audience can be a single string or array of strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Decoded JWT payload after signature/issuer/audience checks pass.
/// Ephemeral, per-request, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Subject
    pub sub: Option<String>,
    /// Stable object/user identifier
    pub oid: Option<String>,
    /// Issuer
    pub iss: Option<String>,
    /// Audience (can be string or array)
    #[serde(default)]
    pub aud: Audience,
    /// Expiration time
    pub exp: Option<u64>,
    /// Not before
    pub nbf: Option<u64>,
    /// Issued at
    pub iat: Option<u64>,
    /// Nonce binding from the authorization request (ID tokens)
    pub nonce: Option<String>,
    /// Preferred username
    pub preferred_username: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Scopes (space-separated string)
    pub scp: Option<String>,
    /// Additional claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl VerifiedClaims {
    /// The stable user identifier: `oid`, falling back to `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.oid.as_deref().or(self.sub.as_deref())
    }

    /// Scopes granted to the token.
    pub fn scopes(&self) -> Vec<String> {
        self.scp
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Claims peeked before signature verification; only the issuer is read.
#[derive(Deserialize)]
struct UnverifiedClaims {
    iss: Option<String>,
}

/// Validates raw bearer tokens against the provider's published keys.
pub struct BearerTokenVerifier {
    settings: Arc<ProviderSettings>,
    resolver: Arc<KeyResolver>,
    /// Statically configured algorithm allow-list. The token header's `alg`
    /// is never consulted when selecting the verification algorithm.
    allowed_algs: Vec<Algorithm>,
    leeway_secs: u64,
}

impl BearerTokenVerifier {
    /// Create a verifier with the default RS256 allow-list.
    pub fn new(settings: Arc<ProviderSettings>, resolver: Arc<KeyResolver>) -> Self {
        Self {
            settings,
            resolver,
            allowed_algs: vec![Algorithm::RS256],
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Validate a raw bearer token, returning its claims on success.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::Unauthorized("missing bearer token".to_string()));
        }

        let header = decode_header(token)
            .map_err(|e| AuthError::Unauthorized(format!("malformed token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Unauthorized("token header missing kid".to_string()))?;

        // Issuer gate runs before any key fetch: a token from the wrong
        // tenant never costs a network round trip.
        let asserted_issuer = peek_issuer(token)?;
        let expected_issuer = self.settings.issuer();
        if asserted_issuer != expected_issuer {
            return Err(AuthError::Unauthorized(format!(
                "unrecognized issuer '{}' in token",
                asserted_issuer
            )));
        }

        let key = self.resolver.key(&kid).await?;

        let mut validation = Validation::new(self.allowed_algs[0]);
        validation.algorithms = self.allowed_algs.clone();
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation.set_issuer(&[&expected_issuer]);
        validation.set_audience(&[&self.settings.audience()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let token_data = decode::<VerifiedClaims>(token, &key, &validation)
            .map_err(|e| AuthError::Unauthorized(format!("token validation failed: {}", e)))?;

        debug!(kid = %kid, "Bearer token validated");
        Ok(token_data.claims)
    }

    /// Non-erroring variant: any failure resolves to `None`.
    pub async fn verify_optional(&self, token: &str) -> Option<VerifiedClaims> {
        match self.verify(token).await {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Bearer token rejected");
                None
            }
        }
    }
}

/// Read the asserted issuer without verifying the signature.
fn peek_issuer(token: &str) -> Result<String, AuthError> {
    let mut peek = Validation::new(Algorithm::RS256);
    peek.insecure_disable_signature_validation();
    peek.validate_exp = false;
    peek.validate_aud = false;
    peek.required_spec_claims.clear();

    let data = decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &peek)
        .map_err(|e| AuthError::Unauthorized(format!("malformed token claims: {}", e)))?;

    data.claims
        .iss
        .ok_or_else(|| AuthError::Unauthorized("token missing iss claim".to_string()))
}
