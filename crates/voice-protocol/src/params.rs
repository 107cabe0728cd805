//! The parameter bundle a caller supplies when creating a session, and the
//! `init` payload built from it.

use crate::message::OutboundMessage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ASR_PROVIDER: &str = "deepgram";
pub const DEFAULT_TTS_PROVIDER: &str = "playht";
pub const DEFAULT_MODEL: &str = "gpt-4-1106-preview";

/// Speech recognition settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AsrParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Speech synthesis settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TtsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Caller-supplied session parameters. Immutable once a session is built.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub asr: AsrParams,
    pub tts: TtsParams,
    /// The model the agent should run with.
    pub model: Option<String>,
    /// Overrides the signaling URL from the client configuration.
    pub transport_url: Option<String>,
    /// Template used by the backend when recording the conversation.
    pub recording_template_url: Option<String>,
    /// Requests a specific media room name.
    pub room_name: Option<String>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            asr: AsrParams {
                provider: Some(DEFAULT_ASR_PROVIDER.to_string()),
                language: None,
            },
            tts: TtsParams {
                provider: Some(DEFAULT_TTS_PROVIDER.to_string()),
                model: None,
                voice: None,
            },
            model: Some(DEFAULT_MODEL.to_string()),
            transport_url: None,
            recording_template_url: None,
            room_name: None,
        }
    }
}

impl VoiceParams {
    /// Builds the `init` frame announcing this session to the backend.
    pub fn init_message(&self, agent_id: &str, conversation_id: Option<&str>) -> OutboundMessage {
        OutboundMessage::Init {
            params: InitParams {
                asr: self.asr.clone(),
                tts: self.tts.clone(),
                agent: AgentParams {
                    agent_id: agent_id.to_string(),
                    conversation_id: conversation_id.map(str::to_string),
                    model: self.model.clone(),
                },
                recording: self
                    .recording_template_url
                    .as_ref()
                    .map(|template_url| RecordingParams {
                        template_url: template_url.clone(),
                    }),
                room: self
                    .room_name
                    .as_ref()
                    .map(|name| RoomParams { name: name.clone() }),
            },
        }
    }
}

/// The `params` object of an `init` frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InitParams {
    pub asr: AsrParams,
    pub tts: TtsParams,
    pub agent: AgentParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomParams>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentParams {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingParams {
    pub template_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomParams {
    pub name: String,
}
