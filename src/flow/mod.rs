//! Authorization-code-flow coordination.
//!
//! `ConfidentialClient` is the confidential-client exchange primitive: it
//! initiates flows, redeems authorization codes, and silently refreshes
//! cached tokens. `AuthCodeFlow` drives the web login lifecycle on top of it,
//! binding flow state to the session.

pub mod client;
pub mod coordinator;
pub mod state;

pub use client::{ConfidentialClient, TokenResult};
pub use coordinator::AuthCodeFlow;
pub use state::FlowState;
