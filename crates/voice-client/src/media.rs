//! The media plane: a real-time room carrying audio tracks and a reliable
//! data sideband.
//!
//! The transport itself (codecs, ICE, SFU routing) lives behind
//! [`MediaBackend`] and [`MediaRoom`]. A room reports what happens to it
//! through the [`RoomEventSink`] it receives at creation, before `connect`
//! is ever called, so no early track or data event can be missed.

use crate::{
    audio::{AudioTrack, RemoteAudioTrack},
    error::MediaError,
    events::{Inbound, Queue, enqueue},
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};
use voice_protocol::OutboundMessage;

/// Something that happened inside a media room.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// The remote participant's audio is now available.
    TrackSubscribed(RemoteAudioTrack),
    /// A data-channel payload arrived.
    DataReceived(Vec<u8>),
    /// The room dropped without being asked to.
    Disconnected(String),
}

/// A joined (or joining) real-time room.
#[async_trait]
pub trait MediaRoom: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<(), MediaError>;
    async fn publish_track(&self, track: AudioTrack) -> Result<(), MediaError>;
    /// Sends on the reliable, ordered data channel.
    async fn send_data(&self, payload: Vec<u8>) -> Result<(), MediaError>;
    /// Leaves the room. Must be safe even if `connect` never completed.
    async fn disconnect(&self) -> Result<(), MediaError>;
}

/// Creates rooms. Each `room_info` gets a fresh room.
pub trait MediaBackend: Send + Sync {
    fn create_room(&self, events: RoomEventSink) -> Arc<dyn MediaRoom>;
}

/// Where a room delivers its events. Events are tagged with the room they
/// came from, so those of a replaced room are recognized and dropped.
#[derive(Clone)]
pub struct RoomEventSink {
    room: u64,
    queue: Queue,
}

impl RoomEventSink {
    pub(crate) fn new(room: u64, queue: Queue) -> Self {
        Self { room, queue }
    }

    pub fn room_id(&self) -> u64 {
        self.room
    }

    /// Delivers an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        enqueue(
            &self.queue,
            Inbound::Media {
                room: self.room,
                event,
            },
        )
    }
}

impl fmt::Debug for RoomEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomEventSink").field("room", &self.room).finish()
    }
}

/// The session's handle on its current room.
pub struct MediaSession {
    id: u64,
    room: Arc<dyn MediaRoom>,
    connected: bool,
    published: bool,
}

impl MediaSession {
    pub(crate) fn create(backend: &dyn MediaBackend, id: u64, queue: Queue) -> Self {
        let room = backend.create_room(RoomEventSink::new(id, queue));
        Self {
            id,
            room,
            connected: false,
            published: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
    }

    /// Returns a future joining the room; it does not borrow the session.
    pub(crate) fn join(
        &self,
        url: String,
        token: String,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<(), MediaError>> {
        let room = Arc::clone(&self.room);
        Box::pin(async move {
            let connect = room.connect(&url, &token);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, connect)
                    .await
                    .unwrap_or(Err(MediaError::TimedOut)),
                None => connect.await,
            }
        })
    }

    /// True when the local track should be published now: the caller has
    /// started, the room is connected, a track exists, and it has not been
    /// published to this room yet.
    pub fn should_publish(&self, started: bool, has_track: bool) -> bool {
        started && self.connected && has_track && !self.published
    }

    pub async fn publish(&mut self, track: AudioTrack) -> Result<(), MediaError> {
        self.published = true;
        info!(room = self.id, track = %track.id(), "Publishing local track.");
        self.room.publish_track(track).await
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), MediaError> {
        if !self.connected {
            return Err(MediaError::Send("room is not connected".to_string()));
        }
        let payload = msg.to_bytes().map_err(|e| MediaError::Send(e.to_string()))?;
        self.room.send_data(payload).await
    }

    pub async fn disconnect(self) -> Result<(), MediaError> {
        debug!(room = self.id, "Disconnecting media room.");
        self.room.disconnect().await
    }
}
