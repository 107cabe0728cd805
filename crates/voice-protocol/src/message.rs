//! Defines the JSON message protocol between the voice client and the backend.

use crate::{error::ProtocolError, params::InitParams, state::SessionState};
use serde::{Deserialize, Serialize};

/// Messages sent from the backend to the client, over either plane.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Credentials for joining the media room.
    RoomInfo {
        #[serde(rename = "roomUrl")]
        room_url: String,
        token: String,
    },
    /// The agent moved to a new conversational state.
    State { state: SessionState },
    /// Speech recognition progress for the user's input.
    Transcript { transcript: InputTranscript },
    /// The agent's spoken output, synchronized with playback. Carries either
    /// the full text so far or an increment to append.
    #[serde(rename = "voice_synced_transcript")]
    OutputTranscript {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        delta: Option<String>,
        #[serde(rename = "final", default)]
        is_final: bool,
    },
    /// A latency metric measured by the backend.
    Latency { kind: String, value: f64 },
    /// Echo of a client `ping`.
    Pong { timestamp: f64 },
    /// The backend created a conversation for this session.
    ConversationCreated {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

/// Tags of every [`InboundMessage`] variant.
pub const INBOUND_TYPES: &[&str] = &[
    "room_info",
    "state",
    "transcript",
    "voice_synced_transcript",
    "latency",
    "pong",
    "conversation_created",
];

/// A partial or final transcription of the user's speech.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InputTranscript {
    pub text: String,
    #[serde(default)]
    pub stream_timestamp: f64,
    #[serde(default)]
    pub last_voice_timestamp: f64,
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// Messages sent from the client to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Announces the session. Sent once per signaling connection.
    Init { params: InitParams },
    /// Latency probe, echoed back as `pong`.
    Ping { timestamp: f64 },
    /// Asks the agent to stop speaking.
    Interrupt,
    /// Text typed by the user in place of speech.
    InputTextMessage { text: String },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decodes a text frame into an [`InboundMessage`].
///
/// A frame with a well-formed `type` tag that this client does not know is
/// reported as [`ProtocolError::UnknownType`] so callers can log and skip it.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?;
    if !INBOUND_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Decodes a binary data-channel payload. The payload must be UTF-8 JSON.
pub fn decode_bytes(payload: &[u8]) -> Result<InboundMessage, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::NotUtf8)?;
    decode(text)
}
