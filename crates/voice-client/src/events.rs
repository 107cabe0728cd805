//! Events flowing out of a session, and the inbound queue feeding its driver.

use crate::{
    audio::{LocalAudioTrack, SignalAnalyzer},
    error::{CaptureError, MediaError, VoiceError},
    media::MediaEvent,
    signaling::SignalingChannel,
};
use tokio::sync::{mpsc, oneshot};
use voice_protocol::{InputTranscript, SessionState};

/// What a session reports to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The visible state changed. Never emitted for a same-state transition.
    StateChanged(SessionState),
    /// Speech recognition progress for the user's input.
    InputTranscript(InputTranscript),
    /// The agent's output so far in the current turn.
    OutputTranscript { text: String, is_final: bool },
    Latency(LatencySample),
    /// The backend assigned a conversation id to this session.
    ConversationCreated(String),
    /// A failure that ended (part of) the session.
    Error(VoiceError),
}

/// A named latency measurement in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub kind: String,
    pub value_ms: f64,
}

/// Receiving side of a session's event stream.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event. Returns `None` once the session is gone and
    /// every event has been read.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Both analyzers, as currently wired.
#[derive(Debug, Clone, Default)]
pub(crate) struct Analyzers {
    pub input: Option<SignalAnalyzer>,
    pub output: Option<SignalAnalyzer>,
}

/// Caller operations, each acknowledged once the driver has processed it.
#[derive(Debug)]
pub(crate) enum Command {
    Start(oneshot::Sender<Result<(), VoiceError>>),
    Stop(oneshot::Sender<()>),
    Interrupt(oneshot::Sender<()>),
    SendText {
        text: String,
        reply: oneshot::Sender<()>,
    },
    Analyzers(oneshot::Sender<Analyzers>),
}

/// Everything the session driver reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum Inbound {
    Command(Command),
    SignalingOpened {
        generation: u64,
        result: Result<SignalingChannel, VoiceError>,
    },
    SignalingFrame {
        generation: u64,
        text: String,
    },
    SignalingClosed {
        generation: u64,
        code: u16,
        reason: String,
    },
    Media {
        room: u64,
        event: MediaEvent,
    },
    RoomJoined {
        room: u64,
        result: Result<(), MediaError>,
    },
    CaptureFinished(Result<LocalAudioTrack, CaptureError>),
}

/// Weak handle on the driver's queue. Producers holding it never keep a
/// dropped session alive.
pub(crate) type Queue = mpsc::WeakUnboundedSender<Inbound>;

/// Pushes into the queue, reporting whether the driver is still there.
pub(crate) fn enqueue(queue: &Queue, inbound: Inbound) -> bool {
    queue
        .upgrade()
        .is_some_and(|tx| tx.send(inbound).is_ok())
}
