//! Transient per-login flow state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State binding one authorization attempt to its eventual callback.
///
/// Created on `/login`, carried in the session, consumed exactly once when
/// the provider redirects back. A stale or mismatched state fails closed: no
/// token issuance. The `state` value is the anti-forgery token the provider
/// echoes back; `nonce` binds the ID token to this attempt; `code_verifier`
/// is the PKCE secret whose S256 digest was sent with the authorize request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowState {
    /// Anti-forgery token echoed back by the provider.
    pub state: String,
    /// ID-token nonce binding.
    pub(crate) nonce: String,
    /// PKCE code verifier.
    pub(crate) code_verifier: String,
    /// Redirect URI the flow was initiated with; the token request must
    /// repeat it verbatim.
    pub redirect_uri: String,
    /// When the flow was initiated.
    pub created_at: DateTime<Utc>,
}

impl FlowState {
    #[cfg(test)]
    pub(crate) fn for_tests(state: &str) -> Self {
        Self {
            state: state.to_string(),
            nonce: format!("{}-nonce", state),
            code_verifier: format!("{}-verifier", state),
            redirect_uri: "http://localhost/getAToken".to_string(),
            created_at: Utc::now(),
        }
    }
}
