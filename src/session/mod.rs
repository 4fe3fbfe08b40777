//! Signed session payload.
//!
//! The session transport is an external collaborator: a scoped, signed
//! key-value store with tamper detection. This module owns the payload the
//! auth core reads and writes through it (`user` and, transiently, `flow`),
//! plus the signing codec at that seam.

pub mod codec;
pub mod types;

pub use codec::{build_set_cookie, SessionCodec, SESSION_COOKIE_NAME};
pub use types::SessionData;
