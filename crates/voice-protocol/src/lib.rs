//! Wire types for the voice session control protocol.
//!
//! Both the signaling websocket and the media room's data channel carry the
//! same JSON encoding: a flat object with a `type` tag. This crate holds the
//! closed sets of inbound and outbound messages and the single decode
//! boundary that turns raw frames into them.

pub mod error;
pub mod message;
pub mod params;
pub mod state;

pub use error::ProtocolError;
pub use message::{InboundMessage, InputTranscript, OutboundMessage, decode, decode_bytes};
pub use params::{AsrParams, TtsParams, VoiceParams};
pub use state::SessionState;
