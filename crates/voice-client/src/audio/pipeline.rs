//! Local capture, remote playback and the two analyzers wired to them.

use super::{
    analyzer::SignalAnalyzer,
    track::{AudioTrack, LocalAudioTrack, RemoteAudioTrack},
};
use crate::error::CaptureError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Platform audio: the microphone and the playback element.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Requests microphone access and starts capture. Suspends while the
    /// user or OS decides on the permission prompt.
    async fn open_microphone(&self) -> Result<LocalAudioTrack, CaptureError>;

    /// Creates the element that plays remote audio.
    fn create_playback(&self) -> Box<dyn PlaybackSink>;
}

/// Plays the remote participant's audio.
pub trait PlaybackSink: Send + Sync {
    fn attach(&mut self, track: RemoteAudioTrack);
    fn set_muted(&mut self, muted: bool);
    fn detach(&mut self);
}

/// Owns every audio resource of one session.
pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    playback: Box<dyn PlaybackSink>,
    muted: bool,
    local: Option<LocalAudioTrack>,
    remote: Option<RemoteAudioTrack>,
    input: Option<SignalAnalyzer>,
    output: Option<SignalAnalyzer>,
}

impl AudioPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        let playback = backend.create_playback();
        Self {
            backend,
            playback,
            muted: true,
            local: None,
            remote: None,
            input: None,
            output: None,
        }
    }

    /// Returns a future that acquires the microphone.
    ///
    /// The future does not borrow the pipeline, so the caller can keep
    /// handling events while the permission prompt is open and simply drop
    /// the future to cancel. A track acquired by a dropped future is released
    /// with it.
    pub fn capture(
        &self,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<LocalAudioTrack, CaptureError>> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, backend.open_microphone())
                    .await
                    .unwrap_or(Err(CaptureError::TimedOut)),
                None => backend.open_microphone().await,
            }
        })
    }

    /// Takes ownership of a captured track and wires the input analyzer to it.
    pub fn install_local(&mut self, track: LocalAudioTrack) {
        if let Some(previous) = self.input.take() {
            previous.disconnect();
        }
        self.input = Some(SignalAnalyzer::attach(track.track()));
        info!(track = %track.track().id(), "Microphone capture established.");
        self.local = Some(track);
    }

    pub fn local_track(&self) -> Option<&AudioTrack> {
        self.local.as_ref().map(LocalAudioTrack::track)
    }

    pub fn has_local_track(&self) -> bool {
        self.local.is_some()
    }

    /// Routes a subscribed remote track to playback and the output analyzer.
    pub fn attach_remote_track(&mut self, track: RemoteAudioTrack) {
        if let Some(previous) = self.output.take() {
            previous.disconnect();
        }
        self.output = Some(SignalAnalyzer::attach(track.track()));
        self.playback.attach(track.clone());
        self.playback.set_muted(self.muted);
        debug!(track = %track.track().id(), "Remote track attached to playback.");
        self.remote = Some(track);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.playback.set_muted(muted);
    }

    pub fn input_analyzer(&self) -> Option<SignalAnalyzer> {
        self.input.clone()
    }

    pub fn output_analyzer(&self) -> Option<SignalAnalyzer> {
        self.output.clone()
    }

    /// Disconnects the remote side: output analyzer and playback.
    pub fn detach_remote(&mut self) {
        if let Some(output) = self.output.take() {
            output.disconnect();
        }
        if self.remote.take().is_some() {
            self.playback.detach();
        }
    }

    /// Disconnects both analyzers and releases the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(input) = self.input.take() {
            input.disconnect();
        }
        self.detach_remote();
        if let Some(local) = self.local.take() {
            local.stop();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
