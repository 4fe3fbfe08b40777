//! Session signing codec.
//!
//! Encodes the session payload as an HS256-signed compact token carrying its
//! own expiry. A cookie that is missing, tampered with, or expired decodes to
//! `None` and is treated exactly like an absent session; signature failures
//! never escalate to errors.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::SessionData;
use crate::flow::FlowState;

/// Cookie name used by the session transport.
pub const SESSION_COOKIE_NAME: &str = "session";

/// Signed wire format: session payload plus expiry.
#[derive(Serialize, Deserialize)]
struct SessionClaims {
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flow: Option<FlowState>,
}

/// Signs and verifies session payloads with the configured session secret.
pub struct SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_minutes: u64,
}

impl SessionCodec {
    /// Create a codec from the session secret and TTL.
    pub fn new(session_secret: &str, ttl_minutes: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(session_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(session_secret.as_bytes()),
            ttl_minutes,
        }
    }

    /// Sign a session payload into its cookie value.
    pub fn encode(&self, session: &SessionData) -> anyhow::Result<String> {
        let claims = SessionClaims {
            exp: (Utc::now() + chrono::Duration::minutes(self.ttl_minutes as i64)).timestamp(),
            user: session.user.clone(),
            flow: session.flow.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("failed to sign session payload: {}", e))
    }

    /// Verify and decode a cookie value.
    ///
    /// Returns `None` for anything that cannot be trusted: bad signature,
    /// malformed payload, or an expired session.
    pub fn decode(&self, cookie_value: &str) -> Option<SessionData> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        match decode::<SessionClaims>(cookie_value, &self.decoding_key, &validation) {
            Ok(data) => Some(SessionData {
                user: data.claims.user,
                flow: data.claims.flow,
            }),
            Err(e) => {
                debug!(error = %e, "Rejecting untrusted session cookie");
                None
            }
        }
    }
}

/// Build a `Set-Cookie` header value for the signed session payload.
pub fn build_set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        name, value, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
