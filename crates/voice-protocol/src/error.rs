/// Reasons an inbound frame could not be turned into an [`InboundMessage`].
///
/// [`InboundMessage`]: crate::InboundMessage
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Message has no `type` field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Message payload is not valid UTF-8")]
    NotUtf8,
}
