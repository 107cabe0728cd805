//! The voice session: one driver task owning both planes and all audio.
//!
//! [`VoiceSession`] is a handle. Every operation is a command sent to the
//! driver over the same queue that carries signaling frames, media-room
//! events and completions of in-flight work, so the driver sees everything
//! in one order and never needs a lock.

use crate::{
    audio::{AudioBackend, AudioPipeline, LocalAudioTrack, SignalAnalyzer},
    config::SessionConfig,
    error::{CaptureError, VoiceError},
    events::{Analyzers, Command, Inbound, LatencySample, Queue, SessionEvent, SessionEvents},
    latency::LatencyProbe,
    machine::StateMachine,
    media::{MediaBackend, MediaEvent, MediaSession},
    signaling::{CloseDisposition, SignalingChannel, classify_close},
    transcript::OutputTranscript,
};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use std::{mem, sync::Arc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};
use voice_protocol::{InboundMessage, OutboundMessage, SessionState, decode, decode_bytes};

/// A live voice conversation with one agent.
///
/// Creating a session warms up its signaling channel right away. Nothing
/// touches the microphone until [`start`](Self::start). Dropping the handle
/// tears the session down.
#[derive(Debug)]
pub struct VoiceSession {
    tx: mpsc::UnboundedSender<Inbound>,
    state: watch::Receiver<SessionState>,
    conversation: watch::Receiver<Option<String>>,
    agent_id: String,
}

impl VoiceSession {
    /// Creates the session and spawns its driver. Must be called within a
    /// Tokio runtime.
    pub fn new(
        config: SessionConfig,
        media: Arc<dyn MediaBackend>,
        audio: Arc<dyn AudioBackend>,
    ) -> (Self, SessionEvents) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let (conversation_tx, conversation) = watch::channel(config.conversation_id.clone());
        let agent_id = config.agent_id.clone();

        let driver = SessionDriver {
            probe: LatencyProbe::new(config.client.ping_interval),
            queue: tx.downgrade(),
            inbox,
            events: events_tx,
            state_tx,
            conversation_tx,
            media,
            pipeline: AudioPipeline::new(audio),
            machine: StateMachine::default(),
            transcript: OutputTranscript::default(),
            lifecycle: Lifecycle::Idle,
            signaling: None,
            signaling_generation: 0,
            opening: None,
            reopen_available: true,
            room: None,
            room_generation: 0,
            pending: FuturesUnordered::new(),
            config,
        };
        let span = info_span!("voice_session", agent_id = %agent_id);
        tokio::spawn(driver.run().instrument(span));

        (
            Self {
                tx,
                state,
                conversation,
                agent_id,
            },
            SessionEvents::new(events_rx),
        )
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes every visible state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// The caller-supplied id, or the one the backend assigned.
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation.borrow().clone()
    }

    /// Captures the microphone and publishes it once the room is ready.
    ///
    /// Fails with [`VoiceError::Permission`] or [`VoiceError::Device`] if the
    /// microphone cannot be acquired, and with [`VoiceError::Aborted`] if
    /// `stop()` runs first. Calling it on a started session is a no-op.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Start(reply))?;
        rx.await.map_err(|_| VoiceError::Closed)?
    }

    /// Tears down both planes and releases all audio. Always safe to call.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Stop(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Asks the agent to stop talking. Ignored unless started.
    pub async fn interrupt(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Interrupt(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Sends typed text in place of speech. Ignored unless listening.
    pub async fn send_text(&self, text: impl Into<String>) {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::SendText {
            text: text.into(),
            reply,
        };
        if self.command(cmd).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn input_analyzer(&self) -> Option<SignalAnalyzer> {
        self.analyzers().await.input
    }

    pub async fn output_analyzer(&self) -> Option<SignalAnalyzer> {
        self.analyzers().await.output
    }

    async fn analyzers(&self) -> Analyzers {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Analyzers(reply)).is_err() {
            return Analyzers::default();
        }
        rx.await.unwrap_or_default()
    }

    fn command(&self, cmd: Command) -> Result<(), VoiceError> {
        self.tx
            .send(Inbound::Command(cmd))
            .map_err(|_| VoiceError::Closed)
    }
}

enum Lifecycle {
    Idle,
    /// Capture in flight; every `start()` caller waits for it.
    Starting(Vec<oneshot::Sender<Result<(), VoiceError>>>),
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenReason {
    Warm,
    Reopen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Signaling,
    DataChannel,
}

struct SessionDriver {
    config: SessionConfig,
    queue: Queue,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    conversation_tx: watch::Sender<Option<String>>,
    media: Arc<dyn MediaBackend>,
    pipeline: AudioPipeline,
    machine: StateMachine,
    transcript: OutputTranscript,
    probe: LatencyProbe,
    lifecycle: Lifecycle,
    signaling: Option<SignalingChannel>,
    signaling_generation: u64,
    opening: Option<OpenReason>,
    reopen_available: bool,
    room: Option<MediaSession>,
    room_generation: u64,
    pending: FuturesUnordered<BoxFuture<'static, Inbound>>,
}

impl SessionDriver {
    async fn run(mut self) {
        self.open_signaling(OpenReason::Warm);
        loop {
            tokio::select! {
                biased;
                inbound = self.inbox.recv() => match inbound {
                    Some(inbound) => self.handle(inbound).await,
                    None => break,
                },
                Some(inbound) = self.pending.next(), if !self.pending.is_empty() => {
                    self.handle(inbound).await
                }
                _ = self.probe.tick() => self.send_ping().await,
            }
        }
        self.teardown(VoiceError::Closed).await;
        debug!("Session handle dropped; driver finished.");
    }

    async fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Command(cmd) => self.handle_command(cmd).await,
            Inbound::SignalingOpened { generation, result } => {
                self.on_signaling_opened(generation, result).await
            }
            Inbound::SignalingFrame { generation, text } => {
                if generation != self.signaling_generation {
                    debug!(generation, "Dropping frame from a replaced signaling channel.");
                    return;
                }
                match decode(&text) {
                    Ok(msg) => self.handle_message(msg, Source::Signaling).await,
                    Err(e) => warn!("Dropping signaling payload: {}", e),
                }
            }
            Inbound::SignalingClosed {
                generation,
                code,
                reason,
            } => self.on_signaling_closed(generation, code, reason).await,
            Inbound::Media { room, event } => self.on_media_event(room, event).await,
            Inbound::RoomJoined { room, result } => {
                if !self.is_current_room(room) {
                    debug!(room, "Ignoring join result of a replaced room.");
                    return;
                }
                match result {
                    Ok(()) => self.on_room_connected().await,
                    Err(e) => {
                        error!(room, "Failed to join media room: {}", e);
                        self.fail(e.into()).await;
                    }
                }
            }
            Inbound::CaptureFinished(result) => self.on_capture_finished(result).await,
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => self.start(reply).await,
            Command::Stop(reply) => {
                self.teardown(VoiceError::Aborted).await;
                info!("Session stopped.");
                let _ = reply.send(());
            }
            Command::Interrupt(reply) => {
                if matches!(self.lifecycle, Lifecycle::Started) {
                    self.send_data(&OutboundMessage::Interrupt).await;
                } else {
                    warn!("interrupt() called on a session that is not started; ignoring.");
                }
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let state = self.machine.visible();
                if state == SessionState::Listening {
                    self.send_data(&OutboundMessage::InputTextMessage { text })
                        .await;
                } else {
                    warn!(state = %state, "send_text() is only valid while listening; ignoring.");
                }
                let _ = reply.send(());
            }
            Command::Analyzers(reply) => {
                let _ = reply.send(Analyzers {
                    input: self.pipeline.input_analyzer(),
                    output: self.pipeline.output_analyzer(),
                });
            }
        }
    }

    async fn start(&mut self, reply: oneshot::Sender<Result<(), VoiceError>>) {
        match &mut self.lifecycle {
            Lifecycle::Started => {
                warn!("start() called on a started session; ignoring.");
                let _ = reply.send(Ok(()));
                return;
            }
            Lifecycle::Starting(waiters) => {
                debug!("start() already in progress; waiting on the same capture.");
                waiters.push(reply);
                return;
            }
            Lifecycle::Idle => {}
        }

        info!("Starting session.");
        self.reopen_available = true;
        if let Some(reason) = self.opening.as_mut() {
            // The caller now depends on the in-flight reopen.
            *reason = OpenReason::Warm;
        } else if self.signaling.is_none() {
            self.open_signaling(OpenReason::Warm);
        }
        if self.machine.visible() == SessionState::Disconnected {
            let target = if self.room.as_ref().is_some_and(MediaSession::is_connected) {
                SessionState::Connected
            } else {
                SessionState::Connecting
            };
            self.transition(target);
        }

        if self.pipeline.has_local_track() {
            self.lifecycle = Lifecycle::Started;
            let _ = reply.send(Ok(()));
            self.maybe_publish().await;
        } else {
            self.lifecycle = Lifecycle::Starting(vec![reply]);
            let capture = self.pipeline.capture(self.config.client.acquire_timeout);
            self.pending
                .push(Box::pin(capture.map(Inbound::CaptureFinished)));
        }
    }

    async fn on_capture_finished(
        &mut self,
        result: Result<LocalAudioTrack, CaptureError>,
    ) {
        let Lifecycle::Starting(waiters) = mem::replace(&mut self.lifecycle, Lifecycle::Idle)
        else {
            debug!("Discarding a capture that finished after start was abandoned.");
            return;
        };
        match result {
            Ok(track) => {
                self.pipeline.install_local(track);
                self.lifecycle = Lifecycle::Started;
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                self.maybe_publish().await;
            }
            Err(e) => {
                let err = VoiceError::from(e);
                warn!("Microphone capture failed: {}", err);
                if matches!(
                    self.machine.visible(),
                    SessionState::Connecting | SessionState::Connected
                ) {
                    self.transition(SessionState::Disconnected);
                }
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }

    fn open_signaling(&mut self, reason: OpenReason) {
        self.signaling_generation += 1;
        self.opening = Some(reason);
        let generation = self.signaling_generation;
        let url = self.config.signaling_url().to_string();
        let init = {
            let conversation = self.conversation_tx.borrow();
            self.config
                .params
                .init_message(&self.config.agent_id, conversation.as_deref())
        };
        let queue = self.queue.clone();
        debug!(generation, ?reason, url = %url, "Opening signaling channel.");
        self.pending.push(Box::pin(async move {
            let result = SignalingChannel::open(&url, generation, queue, init).await;
            Inbound::SignalingOpened { generation, result }
        }));
    }

    async fn on_signaling_opened(
        &mut self,
        generation: u64,
        result: Result<SignalingChannel, VoiceError>,
    ) {
        if generation != self.signaling_generation {
            debug!(generation, "Discarding a replaced signaling channel.");
            return;
        }
        let reason = self.opening.take();
        match result {
            Ok(channel) => {
                info!(generation, "Signaling channel ready.");
                self.signaling = Some(channel);
            }
            Err(e) if reason == Some(OpenReason::Reopen) => {
                warn!("Automatic signaling reopen failed: {}", e);
            }
            Err(e) => {
                error!("Failed to open signaling channel: {}", e);
                self.fail(e).await;
            }
        }
    }

    async fn on_signaling_closed(&mut self, generation: u64, code: u16, reason: String) {
        if generation != self.signaling_generation {
            debug!(generation, "Ignoring closure of a replaced signaling channel.");
            return;
        }
        self.signaling = None;
        self.opening = None;
        self.signaling_generation += 1;

        match classify_close(code, &self.config.client) {
            CloseDisposition::Benign => {
                debug!(code, "Signaling closed with a benign code; ignoring.");
            }
            CloseDisposition::Normal => {
                info!(reason = %reason, "Signaling closed normally by the server.");
            }
            CloseDisposition::Abnormal => {
                error!(code, reason = %reason, "Signaling closed abnormally.");
                let detail = if reason.is_empty() {
                    format!("signaling closed with code {code}")
                } else {
                    format!("signaling closed with code {code}: {reason}")
                };
                self.fail(VoiceError::Connection(detail)).await;
                if mem::take(&mut self.reopen_available) {
                    info!("Reopening signaling channel once.");
                    self.open_signaling(OpenReason::Reopen);
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: InboundMessage, source: Source) {
        match msg {
            InboundMessage::RoomInfo { room_url, token } => {
                if source == Source::DataChannel {
                    warn!("Ignoring room_info received over the data channel.");
                    return;
                }
                self.join_room(room_url, token).await;
            }
            InboundMessage::State { state } => {
                self.transition(state);
            }
            InboundMessage::Transcript { transcript } => {
                self.emit(SessionEvent::InputTranscript(transcript));
            }
            InboundMessage::OutputTranscript {
                text,
                delta,
                is_final,
            } => {
                if let Some((text, is_final)) = self.transcript.apply(text, delta, is_final) {
                    self.emit(SessionEvent::OutputTranscript { text, is_final });
                }
            }
            InboundMessage::Latency { kind, value } => {
                self.emit(SessionEvent::Latency(LatencySample {
                    kind,
                    value_ms: value,
                }));
            }
            InboundMessage::Pong { timestamp } => {
                let sample = self.probe.on_pong(timestamp);
                debug!(rtt_ms = sample.value_ms, "Probe round trip.");
                self.emit(SessionEvent::Latency(sample));
            }
            InboundMessage::ConversationCreated { conversation_id } => {
                let current = self.conversation_tx.borrow().clone();
                match current {
                    Some(existing) if existing == conversation_id => {}
                    Some(existing) => {
                        warn!(
                            existing = %existing,
                            received = %conversation_id,
                            "Conversation id already assigned; keeping it."
                        );
                    }
                    None => {
                        info!(conversation_id = %conversation_id, "Conversation created.");
                        self.conversation_tx
                            .send_replace(Some(conversation_id.clone()));
                        self.emit(SessionEvent::ConversationCreated(conversation_id));
                    }
                }
            }
        }
    }

    async fn join_room(&mut self, url: String, token: String) {
        if let Some(prior) = self.room.take() {
            info!(room = prior.id(), "New room_info received; leaving the current room.");
            self.leave_room(prior).await;
        }
        self.room_generation += 1;
        let id = self.room_generation;
        let room = MediaSession::create(self.media.as_ref(), id, self.queue.clone());
        let join = room.join(url, token, self.config.client.acquire_timeout);
        self.room = Some(room);
        debug!(room = id, "Joining media room.");
        self.pending.push(Box::pin(
            join.map(move |result| Inbound::RoomJoined { room: id, result }),
        ));
    }

    async fn on_room_connected(&mut self) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        room.mark_connected();
        info!(room = room.id(), "Media room connected.");
        self.probe.start();
        if matches!(self.lifecycle, Lifecycle::Started)
            && matches!(
                self.machine.visible(),
                SessionState::Disconnected | SessionState::Connecting
            )
        {
            self.transition(SessionState::Connected);
        }
        self.maybe_publish().await;
    }

    async fn on_media_event(&mut self, room: u64, event: MediaEvent) {
        if !self.is_current_room(room) {
            debug!(room, "Ignoring event from a replaced room.");
            return;
        }
        match event {
            MediaEvent::TrackSubscribed(track) => {
                self.pipeline.attach_remote_track(track);
                if let Some(state) = self.machine.on_track_attached() {
                    info!("Agent track attached; applying deferred speaking state.");
                    self.publish_state(state);
                }
            }
            MediaEvent::DataReceived(payload) => match decode_bytes(&payload) {
                Ok(msg) => self.handle_message(msg, Source::DataChannel).await,
                Err(e) => warn!(room, "Dropping data channel payload: {}", e),
            },
            MediaEvent::Disconnected(reason) => {
                error!(room, reason = %reason, "Media room disconnected unexpectedly.");
                // Already gone; skip the disconnect call.
                self.room = None;
                self.fail(VoiceError::Media(format!("room disconnected: {reason}")))
                    .await;
            }
        }
    }

    fn is_current_room(&self, room: u64) -> bool {
        self.room.as_ref().is_some_and(|r| r.id() == room)
    }

    async fn maybe_publish(&mut self) {
        let started = matches!(self.lifecycle, Lifecycle::Started);
        let has_track = self.pipeline.has_local_track();
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if !room.should_publish(started, has_track) {
            return;
        }
        let Some(track) = self.pipeline.local_track().cloned() else {
            return;
        };
        if let Err(e) = room.publish(track).await {
            error!("Failed to publish local track: {}", e);
            self.fail(e.into()).await;
        }
    }

    async fn send_data(&mut self, msg: &OutboundMessage) {
        match self.room.as_ref() {
            Some(room) if room.is_connected() => {
                if let Err(e) = room.send(msg).await {
                    warn!("Failed to send on the data channel: {}", e);
                }
            }
            _ => warn!(?msg, "No connected media room; dropping message."),
        }
    }

    async fn send_ping(&mut self) {
        let ping = self.probe.ping();
        if let Some(room) = self.room.as_ref().filter(|r| r.is_connected()) {
            if let Err(e) = room.send(&ping).await {
                debug!("Latency probe send failed: {}", e);
            }
        }
    }

    /// Applies `target` unless it equals the visible state or must wait for
    /// the agent track.
    fn transition(&mut self, target: SessionState) {
        match self.machine.request(target) {
            Some(state) => self.publish_state(state),
            None if self.machine.is_speaking_deferred() && target == SessionState::Speaking => {
                debug!("Speaking requested before the agent track; deferring.");
            }
            None => {}
        }
    }

    fn publish_state(&mut self, state: SessionState) {
        self.state_tx.send_replace(state);
        self.pipeline.set_muted(state != SessionState::Speaking);
        info!(state = %state, "Session state changed.");
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn leave_room(&mut self, room: MediaSession) {
        self.probe.cancel();
        self.pipeline.detach_remote();
        if let Some(state) = self.machine.on_track_detached() {
            self.publish_state(state);
        }
        if let Err(e) = room.disconnect().await {
            debug!("Media room disconnect failed: {}", e);
        }
    }

    /// Surfaces a terminal error once and stops the session.
    async fn fail(&mut self, err: VoiceError) {
        self.emit(SessionEvent::Error(err.clone()));
        self.teardown(err).await;
    }

    /// Releases everything and returns to `Disconnected`. Every step runs
    /// regardless of how the others went.
    async fn teardown(&mut self, reason: VoiceError) {
        if let Some(state) = self.machine.reset() {
            self.publish_state(state);
        }
        self.probe.cancel();
        self.pending.clear();
        self.opening = None;
        if let Lifecycle::Starting(waiters) = mem::replace(&mut self.lifecycle, Lifecycle::Idle) {
            for waiter in waiters {
                let _ = waiter.send(Err(reason.clone()));
            }
        }
        if let Some(room) = self.room.take() {
            self.leave_room(room).await;
        }
        self.pipeline.stop();
        if let Some(mut channel) = self.signaling.take() {
            channel.close().await;
        }
        self.signaling_generation += 1;
        self.transcript.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{AudioTrack, PlaybackSink, RemoteAudioTrack, pipeline::MockAudioBackend},
        config::ClientConfig,
        media::{MediaRoom, RoomEventSink},
    };
    use async_trait::async_trait;

    struct NullPlayback;

    impl PlaybackSink for NullPlayback {
        fn attach(&mut self, _track: RemoteAudioTrack) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn detach(&mut self) {}
    }

    struct NoRooms;

    impl MediaBackend for NoRooms {
        fn create_room(&self, _events: RoomEventSink) -> Arc<dyn MediaRoom> {
            unreachable!("no room_info is ever received")
        }
    }

    async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}", listener.local_addr().unwrap())
    }

    fn audio(capture: Result<(), CaptureError>) -> Arc<MockAudioBackend> {
        let mut backend = MockAudioBackend::new();
        backend
            .expect_create_playback()
            .returning(|| Box::new(NullPlayback));
        backend.expect_open_microphone().returning(move || {
            capture
                .clone()
                .map(|()| LocalAudioTrack::new(AudioTrack::new("mic"), || {}))
        });
        Arc::new(backend)
    }

    fn config(url: String) -> SessionConfig {
        SessionConfig::new("agent-1").with_client(ClientConfig {
            signaling_url: url,
            ..ClientConfig::default()
        })
    }

    #[tokio::test]
    async fn test_unreachable_signaling_surfaces_connection_error() {
        let (session, mut events) = VoiceSession::new(
            config(unreachable_url().await),
            Arc::new(NoRooms),
            audio(Ok(())),
        );

        match events.recv().await {
            Some(SessionEvent::Error(VoiceError::Connection(_))) => {}
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.agent_id(), "agent-1");
    }

    #[tokio::test]
    async fn test_permission_denied_rejects_start() {
        let (session, _events) = VoiceSession::new(
            config(unreachable_url().await),
            Arc::new(NoRooms),
            audio(Err(CaptureError::PermissionDenied("denied".into()))),
        );

        let err = session.start().await.unwrap_err();
        assert_eq!(err, VoiceError::Permission("denied".into()));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.input_analyzer().await.is_none());
    }

    #[tokio::test]
    async fn test_misuse_is_a_quiet_no_op() {
        let (session, _events) = VoiceSession::new(
            config(unreachable_url().await),
            Arc::new(NoRooms),
            audio(Ok(())),
        );

        session.send_text("hello").await;
        session.interrupt().await;
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
