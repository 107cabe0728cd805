//! Audio resources of a session.
//!
//! - `track`: PCM frame streams and the scoped microphone handle.
//! - `analyzer`: level and spectrum readers for visualization.
//! - `pipeline`: capture, playback and analyzer wiring, plus the platform traits.
//! - `pcm`: sample conversion and signal math.

pub mod analyzer;
pub mod pcm;
pub mod pipeline;
pub mod track;

pub use analyzer::SignalAnalyzer;
pub use pipeline::{AudioBackend, AudioPipeline, PlaybackSink};
pub use track::{AudioFrame, AudioTrack, LocalAudioTrack, RemoteAudioTrack};
