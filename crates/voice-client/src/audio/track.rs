//! Audio tracks: broadcast streams of PCM16 frames.

use std::{fmt, sync::Arc};
use tokio::sync::broadcast;
use tracing::debug;

/// Frames buffered per subscriber before the slowest one starts lagging.
pub const FRAME_BUFFER: usize = 64;

/// One chunk of mono PCM16 audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }
}

/// A single audio stream. Cloning yields another handle to the same stream;
/// every subscriber sees every frame pushed after it subscribed.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    id: Arc<str>,
    frames: broadcast::Sender<AudioFrame>,
}

impl AudioTrack {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            id: id.into(),
            frames,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pushes a frame to all current subscribers, returning how many saw it.
    pub fn push(&self, frame: AudioFrame) -> usize {
        self.frames.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }
}

/// Audio received from the remote participant.
#[derive(Debug, Clone)]
pub struct RemoteAudioTrack(AudioTrack);

impl RemoteAudioTrack {
    pub fn new(track: AudioTrack) -> Self {
        Self(track)
    }

    pub fn track(&self) -> &AudioTrack {
        &self.0
    }
}

/// The captured microphone track.
///
/// Holds the capture device for as long as it lives: the backend's release
/// hook runs exactly once, on [`stop`](Self::stop) or on drop, whichever
/// comes first.
pub struct LocalAudioTrack {
    track: AudioTrack,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LocalAudioTrack {
    pub fn new(track: AudioTrack, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            track,
            release: Some(Box::new(release)),
        }
    }

    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub fn stop(mut self) {
        self.release_device();
    }

    fn release_device(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!(track = %self.track.id(), "Released local audio track.");
        }
    }
}

impl Drop for LocalAudioTrack {
    fn drop(&mut self) {
        self.release_device();
    }
}

impl fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("track", &self.track.id())
            .field("released", &self.release.is_none())
            .finish()
    }
}
