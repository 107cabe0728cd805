//! Signal analyzers exposing live amplitude and frequency data for
//! visualization.

use super::{
    pcm,
    track::{AudioFrame, AudioTrack},
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

/// Samples kept in the sliding analysis window.
pub const DEFAULT_WINDOW: usize = 1024;

/// Reads a track's frames on demand and reports over the most recent window.
///
/// The analyzer owns its subscription to the track. It must be
/// [`disconnect`](Self::disconnect)ed when the session stops; afterwards it
/// reads as silence. Clones share the same subscription.
#[derive(Debug, Clone)]
pub struct SignalAnalyzer {
    inner: Arc<Mutex<AnalyzerState>>,
}

#[derive(Debug)]
struct AnalyzerState {
    track_id: String,
    source: Option<broadcast::Receiver<AudioFrame>>,
    window: VecDeque<f32>,
    capacity: usize,
    spectrum: pcm::Spectrum,
}

impl AnalyzerState {
    fn drain(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        loop {
            match source.try_recv() {
                Ok(frame) => {
                    self.window.extend(pcm::i16_to_f32(&frame.samples));
                    let excess = self.window.len().saturating_sub(self.capacity);
                    self.window.drain(..excess);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(track = %self.track_id, skipped, "Analyzer lagged behind its track.");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

impl SignalAnalyzer {
    pub fn attach(track: &AudioTrack) -> Self {
        Self::with_window(track, DEFAULT_WINDOW)
    }

    pub fn with_window(track: &AudioTrack, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AnalyzerState {
                track_id: track.id().to_string(),
                source: Some(track.subscribe()),
                window: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                spectrum: pcm::Spectrum::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, AnalyzerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// RMS level of the current window, in `0.0..=1.0`.
    pub fn level(&self) -> f32 {
        let mut state = self.state();
        state.drain();
        pcm::rms(state.window.make_contiguous())
    }

    /// Magnitude spectrum of the current window reduced to `bins` bins.
    pub fn frequency_data(&self, bins: usize) -> Vec<f32> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.drain();
        state
            .spectrum
            .magnitudes(state.window.make_contiguous(), bins)
    }

    pub fn is_connected(&self) -> bool {
        self.state().source.is_some()
    }

    /// Drops the track subscription. Safe to call more than once.
    pub fn disconnect(&self) {
        let mut state = self.state();
        if state.source.take().is_some() {
            debug!(track = %state.track_id, "Analyzer disconnected.");
        }
        state.window.clear();
    }
}
