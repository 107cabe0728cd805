use std::time::Duration;
use voice_protocol::VoiceParams;

pub const DEFAULT_SIGNALING_URL: &str = "wss://wsapi.fixie.ai";
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Client-wide settings, shared by every session the process creates.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub signaling_url: String,
    /// Close codes that mark a duplicate-initialization artifact of the host
    /// environment rather than a real failure.
    pub benign_close_codes: Vec<u16>,
    pub ping_interval: Duration,
    /// Upper bound on microphone acquisition and room join. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            benign_close_codes: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            acquire_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let signaling_url = std::env::var("VOICE_SIGNALING_URL")
            .unwrap_or_else(|_| DEFAULT_SIGNALING_URL.to_string());
        if !(signaling_url.starts_with("ws://") || signaling_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "VOICE_SIGNALING_URL".to_string(),
                format!("'{}' is not a websocket URL", signaling_url),
            ));
        }

        let benign_close_codes = match std::env::var("VOICE_BENIGN_CLOSE_CODES") {
            Ok(raw) => parse_close_codes(&raw)?,
            Err(_) => Vec::new(),
        };

        let ping_interval = match std::env::var("VOICE_PING_INTERVAL_MS") {
            Ok(raw) => match parse_millis("VOICE_PING_INTERVAL_MS", &raw)? {
                d if d.is_zero() => {
                    return Err(ConfigError::InvalidValue(
                        "VOICE_PING_INTERVAL_MS".to_string(),
                        "interval must be positive".to_string(),
                    ));
                }
                d => d,
            },
            Err(_) => DEFAULT_PING_INTERVAL,
        };

        let acquire_timeout = std::env::var("VOICE_ACQUIRE_TIMEOUT_MS")
            .ok()
            .map(|raw| parse_millis("VOICE_ACQUIRE_TIMEOUT_MS", &raw))
            .transpose()?;

        Ok(Self {
            signaling_url,
            benign_close_codes,
            ping_interval,
            acquire_timeout,
        })
    }

    pub fn is_benign_close(&self, code: u16) -> bool {
        self.benign_close_codes.contains(&code)
    }
}

fn parse_millis(var: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

fn parse_close_codes(raw: &str) -> Result<Vec<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>().map_err(|e| {
                ConfigError::InvalidValue("VOICE_BENIGN_CLOSE_CODES".to_string(), e.to_string())
            })
        })
        .collect()
}

/// Everything needed to build one [`VoiceSession`](crate::VoiceSession).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub agent_id: String,
    pub conversation_id: Option<String>,
    pub params: VoiceParams,
    pub client: ClientConfig,
}

impl SessionConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation_id: None,
            params: VoiceParams::default(),
            client: ClientConfig::default(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_params(mut self, params: VoiceParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// The signaling URL, honoring the per-session transport override.
    pub fn signaling_url(&self) -> &str {
        self.params
            .transport_url
            .as_deref()
            .unwrap_or(&self.client.signaling_url)
    }
}
