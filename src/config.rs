//! Provider settings.
//!
//! Immutable configuration for one registered confidential client against the
//! Microsoft identity platform. Constructed once at application startup and
//! shared as `Arc<ProviderSettings>`; components receive it explicitly rather
//! than reading ambient globals.

use serde::Deserialize;
use uuid::Uuid;

/// Default authority base for the Microsoft identity platform.
pub const DEFAULT_BASE_AUTHORITY_URL: &str = "https://login.microsoftonline.com/";

fn default_base_authority_url() -> String {
    DEFAULT_BASE_AUTHORITY_URL.to_string()
}

fn default_session_ttl_minutes() -> u64 {
    60 * 24 // 1 day
}

fn default_https_only() -> bool {
    true
}

/// Settings for one registered application (confidential client).
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    /// Application (client) ID from the app registration.
    pub client_id: Uuid,

    /// Client secret. Never logged.
    pub client_secret: String,

    /// Directory (tenant) ID.
    pub tenant_id: Uuid,

    /// Authority base URL. The tenant ID is appended to form the authority.
    #[serde(default = "default_base_authority_url")]
    pub base_authority_url: String,

    /// Scopes requested during login and silent acquisition.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Secret used to sign the session payload. Never logged.
    pub session_secret: String,

    /// Session lifetime in minutes.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,

    /// Mark session cookies as Secure.
    #[serde(default = "default_https_only")]
    pub https_only: bool,
}

impl ProviderSettings {
    /// Build settings from `AUTH_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        fn var(name: &str) -> Result<String, String> {
            std::env::var(name).map_err(|_| format!("{} is not set", name))
        }

        let client_id = var("AUTH_CLIENT_ID")?
            .parse::<Uuid>()
            .map_err(|e| format!("AUTH_CLIENT_ID is not a valid UUID: {}", e))?;
        let tenant_id = var("AUTH_TENANT_ID")?
            .parse::<Uuid>()
            .map_err(|e| format!("AUTH_TENANT_ID is not a valid UUID: {}", e))?;

        let settings = Self {
            client_id,
            client_secret: var("AUTH_CLIENT_SECRET")?,
            tenant_id,
            base_authority_url: std::env::var("AUTH_BASE_AUTHORITY_URL")
                .unwrap_or_else(|_| default_base_authority_url()),
            scopes: std::env::var("AUTH_SCOPES")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            session_secret: var("AUTH_SESSION_SECRET")?,
            session_ttl_minutes: match std::env::var("AUTH_SESSION_TTL_MINUTES") {
                Ok(v) => v
                    .parse()
                    .map_err(|e| format!("AUTH_SESSION_TTL_MINUTES: {}", e))?,
                Err(_) => default_session_ttl_minutes(),
            },
            https_only: match std::env::var("AUTH_HTTPS_ONLY") {
                Ok(v) => v
                    .parse()
                    .map_err(|e| format!("AUTH_HTTPS_ONLY: {}", e))?,
                Err(_) => default_https_only(),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_secret.is_empty() {
            return Err("client_secret must not be empty".to_string());
        }

        if self.session_secret.is_empty() {
            return Err("session_secret must not be empty".to_string());
        }

        if !self.base_authority_url.starts_with("https://")
            && !self.base_authority_url.starts_with("http://")
        {
            return Err("base_authority_url must be a valid HTTP(S) URL".to_string());
        }

        if !self.base_authority_url.ends_with('/') {
            return Err("base_authority_url must end with '/'".to_string());
        }

        if self.session_ttl_minutes == 0 {
            return Err("session_ttl_minutes must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Tenant authority URL.
    pub fn authority(&self) -> String {
        format!("{}{}", self.base_authority_url, self.tenant_id)
    }

    /// Expected `iss` claim for tokens issued by this tenant (v2.0 endpoint).
    pub fn issuer(&self) -> String {
        format!("{}/v2.0", self.authority())
    }

    /// OpenID Connect discovery document URL (yields the `jwks_uri`).
    pub fn metadata_url(&self) -> String {
        format!("{}/v2.0/.well-known/openid-configuration", self.authority())
    }

    /// Authorization endpoint for the code flow redirect.
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// Token endpoint for code redemption and refresh.
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    /// Expected audience for bearer tokens (the client ID in string form).
    pub fn audience(&self) -> String {
        self.client_id.to_string()
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("base_authority_url", &self.base_authority_url)
            .field("scopes", &self.scopes)
            .field("session_secret", &"<redacted>")
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .field("https_only", &self.https_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> ProviderSettings {
        ProviderSettings {
            client_id: Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap(),
            client_secret: "secret".to_string(),
            tenant_id: Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap(),
            base_authority_url: default_base_authority_url(),
            scopes: vec!["User.Read".to_string()],
            session_secret: "session-secret".to_string(),
            session_ttl_minutes: 60,
            https_only: true,
        }
    }

    #[test]
    fn test_derived_urls() {
        let settings = test_settings();
        assert_eq!(
            settings.authority(),
            "https://login.microsoftonline.com/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"
        );
        assert_eq!(
            settings.issuer(),
            "https://login.microsoftonline.com/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee/v2.0"
        );
        assert_eq!(
            settings.metadata_url(),
            "https://login.microsoftonline.com/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee/v2.0/.well-known/openid-configuration"
        );
        assert!(settings.token_endpoint().ends_with("/oauth2/v2.0/token"));
        assert!(settings.authorize_endpoint().ends_with("/oauth2/v2.0/authorize"));
    }

    #[test]
    fn test_validation() {
        let settings = test_settings();
        assert!(settings.validate().is_ok());

        let mut bad = test_settings();
        bad.client_secret = String::new();
        assert!(bad.validate().is_err());

        let mut bad = test_settings();
        bad.base_authority_url = "login.microsoftonline.com/".to_string();
        assert!(bad.validate().is_err());

        let mut bad = test_settings();
        bad.base_authority_url = "https://login.microsoftonline.com".to_string();
        assert!(bad.validate().is_err());

        let mut bad = test_settings();
        bad.session_ttl_minutes = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", test_settings());
        assert!(!rendered.contains("session-secret"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "client_id": "11111111-2222-3333-4444-555555555555",
            "client_secret": "s",
            "tenant_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            "session_secret": "k"
        }"#;
        let settings: ProviderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.base_authority_url, DEFAULT_BASE_AUTHORITY_URL);
        assert!(settings.scopes.is_empty());
        assert!(settings.https_only);
    }
}
