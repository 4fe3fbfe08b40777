//! Session payload types.

use serde::{Deserialize, Serialize};

use crate::flow::FlowState;

/// The session payload relevant to authentication.
///
/// At most two fields ever live here: the stable user identifier (`oid`) once
/// a login has completed, and the transient flow state between `/login` and
/// the callback. The payload travels inside a signed cookie; tampering is
/// caught by the codec, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    /// Stable provider-issued user identifier (`oid` claim), set only after a
    /// successful code exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Pending authorization attempt. Present only between login and callback
    /// and consumed exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowState>,
}

impl SessionData {
    /// An empty, anonymous session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// True when no identity marker is present.
    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }

    /// Stamp the session with a completed login.
    pub fn set_user(&mut self, oid: String) {
        self.user = Some(oid);
    }

    /// Clear the identity marker (logout).
    pub fn clear_user(&mut self) {
        self.user = None;
    }

    /// Store a pending flow, replacing any previous attempt. At most one live
    /// flow per session.
    pub fn set_flow(&mut self, flow: FlowState) {
        self.flow = Some(flow);
    }

    /// Remove and return the pending flow. Single use: a second call returns
    /// `None`.
    pub fn take_flow(&mut self) -> Option<FlowState> {
        self.flow.take()
    }
}
