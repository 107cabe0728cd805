//! Fixie voice client.
//!
//! Re-exports the session client and its wire protocol under one crate.

pub use voice_client::*;
pub use voice_protocol as protocol;
