//! Voice Session Client Library Crate
//!
//! Drives a live voice conversation with a remote agent over two planes: a
//! signaling websocket for session setup and events, and a real-time media
//! room carrying audio tracks plus a data sideband. The platform pieces
//! (microphone, playback, the media transport) are supplied by the caller
//! through [`AudioBackend`] and [`MediaBackend`].

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod latency;
pub mod machine;
pub mod media;
pub mod session;
pub mod signaling;
pub mod transcript;

pub use audio::{
    AudioBackend, AudioFrame, AudioTrack, LocalAudioTrack, PlaybackSink, RemoteAudioTrack,
    SignalAnalyzer,
};
pub use config::{ClientConfig, ConfigError, SessionConfig};
pub use error::{CaptureError, MediaError, VoiceError};
pub use events::{LatencySample, SessionEvent, SessionEvents};
pub use media::{MediaBackend, MediaEvent, MediaRoom, RoomEventSink};
pub use session::VoiceSession;
pub use voice_protocol::{InputTranscript, SessionState, VoiceParams};
