//! Shared harness for the end-to-end session tests: a local websocket
//! signaling backend and in-memory media and audio backends.
#![allow(dead_code)]

use async_trait::async_trait;
use fixie_voice::{
    AudioBackend, AudioTrack, CaptureError, ClientConfig, LocalAudioTrack, MediaBackend,
    MediaError, MediaEvent, MediaRoom, PlaybackSink, RemoteAudioTrack, RoomEventSink,
    SessionConfig, SessionEvent, SessionEvents, VoiceSession,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{Instant, timeout},
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `check` until it holds, failing the test after [`WAIT`].
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Skips events until one matches.
pub async fn wait_event(
    events: &mut SessionEvents,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) if matches(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event stream ended"),
            Err(_) => panic!("no matching event in time"),
        }
    }
}

/// Collects every event that arrives within `window`.
pub async fn collect_for(events: &mut SessionEvents, window: Duration) -> Vec<SessionEvent> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

pub struct SignalingServer {
    listener: TcpListener,
    pub url: String,
}

impl SignalingServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        Self { listener, url }
    }

    pub async fn accept(&self) -> ServerConn {
        self.try_accept(WAIT)
            .await
            .expect("client did not connect in time")
    }

    pub async fn try_accept(&self, within: Duration) -> Option<ServerConn> {
        let (tcp, _) = timeout(within, self.listener.accept()).await.ok()?.ok()?;
        let ws = accept_async(tcp).await.ok()?;
        Some(ServerConn { ws })
    }
}

pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("no frame in time")
                .expect("client closed the socket")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    pub async fn close_with(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "test".into(),
        };
        self.ws.close(Some(frame)).await.unwrap();
    }

    /// Reads until the client closes, returning its close code.
    pub async fn client_close_code(&mut self) -> Option<u16> {
        while let Ok(Some(Ok(msg))) = timeout(WAIT, self.ws.next()).await {
            if let Message::Close(frame) = msg {
                return frame.map(|f| u16::from(f.code));
            }
        }
        None
    }
}

#[derive(Default)]
pub struct FakeMedia {
    rooms: Mutex<Vec<Arc<FakeRoom>>>,
    pub fail_connect: AtomicBool,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    pub async fn room(&self, index: usize) -> Arc<FakeRoom> {
        eventually(|| self.room_count() > index).await;
        self.rooms.lock().unwrap()[index].clone()
    }
}

impl MediaBackend for FakeMedia {
    fn create_room(&self, events: RoomEventSink) -> Arc<dyn MediaRoom> {
        let room = Arc::new(FakeRoom {
            sink: events,
            fail_connect: self.fail_connect.load(Ordering::SeqCst),
            joined: Mutex::new(None),
            disconnected: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        });
        self.rooms.lock().unwrap().push(room.clone());
        room
    }
}

pub struct FakeRoom {
    sink: RoomEventSink,
    fail_connect: bool,
    joined: Mutex<Option<(String, String)>>,
    disconnected: AtomicBool,
    published: Mutex<Vec<String>>,
    sent: Mutex<Vec<Value>>,
}

impl FakeRoom {
    pub fn joined(&self) -> Option<(String, String)> {
        self.joined.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|msg| msg["type"] == kind)
            .collect()
    }

    pub fn subscribe_track(&self, id: &str) -> bool {
        self.sink.emit(MediaEvent::TrackSubscribed(RemoteAudioTrack::new(
            AudioTrack::new(id),
        )))
    }

    pub fn deliver(&self, value: Value) -> bool {
        self.sink
            .emit(MediaEvent::DataReceived(value.to_string().into_bytes()))
    }

    pub fn drop_connection(&self, reason: &str) -> bool {
        self.sink.emit(MediaEvent::Disconnected(reason.to_string()))
    }
}

#[async_trait]
impl MediaRoom for FakeRoom {
    async fn connect(&self, url: &str, token: &str) -> Result<(), MediaError> {
        if self.fail_connect {
            return Err(MediaError::Connect("refused".into()));
        }
        *self.joined.lock().unwrap() = Some((url.to_string(), token.to_string()));
        Ok(())
    }

    async fn publish_track(&self, track: AudioTrack) -> Result<(), MediaError> {
        self.published.lock().unwrap().push(track.id().to_string());
        Ok(())
    }

    async fn send_data(&self, payload: Vec<u8>) -> Result<(), MediaError> {
        let value = serde_json::from_slice(&payload).map_err(|e| MediaError::Send(e.to_string()))?;
        self.sent.lock().unwrap().push(value);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MediaError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAudio {
    pub opens: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    /// Capture never completes, as if the permission prompt stayed open.
    pub hang: AtomicBool,
    pub deny: AtomicBool,
    pub playback: Arc<Mutex<Vec<String>>>,
}

impl FakeAudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn playback_log(&self) -> Vec<String> {
        self.playback.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioBackend for FakeAudio {
    async fn open_microphone(&self) -> Result<LocalAudioTrack, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("denied by user".into()));
        }
        let releases = self.releases.clone();
        let track = LocalAudioTrack::new(AudioTrack::new("mic"), move || {
            releases.fetch_add(1, Ordering::SeqCst);
        });
        if self.hang.load(Ordering::SeqCst) {
            let _held = track;
            return std::future::pending().await;
        }
        Ok(track)
    }

    fn create_playback(&self) -> Box<dyn PlaybackSink> {
        Box::new(FakePlayback(self.playback.clone()))
    }
}

struct FakePlayback(Arc<Mutex<Vec<String>>>);

impl PlaybackSink for FakePlayback {
    fn attach(&mut self, track: RemoteAudioTrack) {
        self.0
            .lock()
            .unwrap()
            .push(format!("attach:{}", track.track().id()));
    }

    fn set_muted(&mut self, muted: bool) {
        self.0.lock().unwrap().push(format!("muted:{muted}"));
    }

    fn detach(&mut self) {
        self.0.lock().unwrap().push("detach".into());
    }
}

/// A session wired to a local signaling server and fake backends, with its
/// first signaling connection accepted and `init` read.
pub struct Harness {
    pub server: SignalingServer,
    pub media: Arc<FakeMedia>,
    pub audio: Arc<FakeAudio>,
    pub session: VoiceSession,
    pub events: SessionEvents,
    pub conn: ServerConn,
    pub init: Value,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(|_, _| {}).await
    }

    pub async fn with(configure: impl FnOnce(&mut SessionConfig, &FakeAudio)) -> Self {
        init_tracing();
        let server = SignalingServer::bind().await;
        let media = FakeMedia::new();
        let audio = FakeAudio::new();
        let mut config = SessionConfig::new("agent-1").with_client(ClientConfig {
            signaling_url: server.url.clone(),
            ping_interval: Duration::from_secs(3600),
            ..ClientConfig::default()
        });
        configure(&mut config, &audio);

        let (session, events) = VoiceSession::new(config, media.clone(), audio.clone());
        let mut conn = server.accept().await;
        let init = conn.recv_json().await;
        Self {
            server,
            media,
            audio,
            session,
            events,
            conn,
            init,
        }
    }

    /// Sends `room_info` and waits until the room has been joined.
    pub async fn join_room(&mut self) -> Arc<FakeRoom> {
        let index = self.media.room_count();
        self.conn
            .send_json(serde_json::json!({
                "type": "room_info",
                "roomUrl": format!("wss://rooms.test/{index}"),
                "token": "tok",
            }))
            .await;
        let room = self.media.room(index).await;
        eventually(|| room.joined().is_some()).await;
        room
    }

    /// Joins a room and starts, waiting until the microphone is published.
    pub async fn start_connected(&mut self) -> Arc<FakeRoom> {
        let room = self.join_room().await;
        self.session.start().await.unwrap();
        eventually(|| room.published().len() == 1).await;
        room
    }

    pub async fn send_state(&mut self, state: &str) {
        self.conn
            .send_json(serde_json::json!({ "type": "state", "state": state }))
            .await;
    }
}
