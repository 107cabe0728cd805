//! Error types for the voice client.

use thiserror::Error;

/// Errors surfaced to the caller, either as the result of `start()` or
/// through [`SessionEvent::Error`](crate::SessionEvent::Error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// The signaling socket failed to open or closed abnormally.
    #[error("Signaling connection error: {0}")]
    Connection(String),

    /// The user or OS refused microphone access.
    #[error("Microphone permission denied: {0}")]
    Permission(String),

    /// No usable input device.
    #[error("Audio device error: {0}")]
    Device(String),

    /// The media room failed.
    #[error("Media session error: {0}")]
    Media(String),

    /// `stop()` ran while the operation was in flight.
    #[error("Operation aborted by stop()")]
    Aborted,

    /// The session driver is gone.
    #[error("Session closed")]
    Closed,
}

/// Failures reported by an [`AudioBackend`](crate::audio::AudioBackend)
/// while acquiring the microphone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no input device: {0}")]
    NoDevice(String),
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("timed out acquiring microphone")]
    TimedOut,
}

impl From<CaptureError> for VoiceError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => VoiceError::Permission(msg),
            CaptureError::NoDevice(msg) => VoiceError::Device(msg),
            other => VoiceError::Device(other.to_string()),
        }
    }
}

/// Failures reported by a [`MediaRoom`](crate::media::MediaRoom).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("room connect failed: {0}")]
    Connect(String),
    #[error("track publish failed: {0}")]
    Publish(String),
    #[error("data send failed: {0}")]
    Send(String),
    #[error("room disconnect failed: {0}")]
    Disconnect(String),
    #[error("timed out joining room")]
    TimedOut,
}

impl From<MediaError> for VoiceError {
    fn from(err: MediaError) -> Self {
        VoiceError::Media(err.to_string())
    }
}
