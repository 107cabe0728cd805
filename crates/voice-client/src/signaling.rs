//! The control-plane websocket.
//!
//! Opening a channel connects, sends `init`, and spawns a read pump that
//! forwards every text frame into the session queue tagged with the channel's
//! generation. The pump reports the end of the stream exactly once, with the
//! close code the peer sent, 1005 for a close frame without a status, or 1006
//! when the connection dropped without a close frame. A locally closed channel
//! reports nothing.

use crate::{
    config::ClientConfig,
    error::VoiceError,
    events::{Inbound, Queue, enqueue},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::{fmt, time::Duration};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{debug, info, warn};
use voice_protocol::OutboundMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code of a normal closure.
pub const NORMAL_CLOSE: u16 = 1000;

/// How long a local close waits for the close handshake to flush.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

/// How a remote closure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// The peer ended the conversation cleanly.
    Normal,
    /// A configured duplicate-initialization artifact. Ignored.
    Benign,
    /// Anything else, including a dropped connection without a close frame.
    Abnormal,
}

pub fn classify_close(code: u16, config: &ClientConfig) -> CloseDisposition {
    match code {
        code if config.is_benign_close(code) => CloseDisposition::Benign,
        NORMAL_CLOSE => CloseDisposition::Normal,
        _ => CloseDisposition::Abnormal,
    }
}

pub struct SignalingChannel {
    generation: u64,
    sink: SplitSink<WsStream, Message>,
    pump: JoinHandle<()>,
    closed: bool,
}

impl SignalingChannel {
    /// Connects to `url` and sends `init` as the first frame.
    pub(crate) async fn open(
        url: &str,
        generation: u64,
        queue: Queue,
        init: OutboundMessage,
    ) -> Result<Self, VoiceError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))?;
        let (sink, stream) = ws_stream.split();
        info!(generation, "Connected to signaling server.");

        let pump = tokio::spawn(pump(stream, generation, queue));
        let mut channel = Self {
            generation,
            sink,
            pump,
            closed: false,
        };
        channel.send(&init).await?;
        Ok(channel)
    }

    pub async fn send(&mut self, msg: &OutboundMessage) -> Result<(), VoiceError> {
        if self.closed {
            return Err(VoiceError::Connection("signaling channel is closed".into()));
        }
        let text = msg
            .encode()
            .map_err(|e| VoiceError::Connection(e.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }

    /// Closes with a normal close frame. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pump.abort();

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let flush = async {
            self.sink.send(Message::Close(Some(frame))).await?;
            self.sink.close().await
        };
        match tokio::time::timeout(CLOSE_FLUSH, flush).await {
            Ok(Ok(())) => debug!(generation = self.generation, "Signaling channel closed."),
            Ok(Err(e)) => debug!(generation = self.generation, "Close handshake failed: {}", e),
            Err(_) => debug!(generation = self.generation, "Close handshake timed out."),
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("generation", &self.generation)
            .field("closed", &self.closed)
            .finish()
    }
}

async fn pump(mut stream: SplitStream<WsStream>, generation: u64, queue: Queue) {
    let mut code = u16::from(CloseCode::Abnormal);
    let mut reason = String::new();

    while let Some(msg_result) = stream.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(generation, "Dropping non-UTF-8 binary signaling frame.");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) => {
                        code = u16::from(frame.code);
                        reason = frame.reason.into_owned();
                    }
                    None => code = u16::from(CloseCode::Status),
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(generation, "Signaling read failed: {}", e);
                break;
            }
        };
        if !enqueue(&queue, Inbound::SignalingFrame { generation, text }) {
            return;
        }
    }

    debug!(generation, code, "Signaling stream ended.");
    enqueue(
        &queue,
        Inbound::SignalingClosed {
            generation,
            code,
            reason,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{net::TcpListener, sync::mpsc};
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_classify_close() {
        let config = ClientConfig {
            benign_close_codes: vec![4001],
            ..ClientConfig::default()
        };
        assert_eq!(classify_close(1000, &config), CloseDisposition::Normal);
        assert_eq!(classify_close(4001, &config), CloseDisposition::Benign);
        assert_eq!(classify_close(1006, &config), CloseDisposition::Abnormal);
        assert_eq!(
            classify_close(4001, &ClientConfig::default()),
            CloseDisposition::Abnormal
        );

        let dropped = ClientConfig {
            benign_close_codes: vec![1006],
            ..ClientConfig::default()
        };
        assert_eq!(classify_close(1006, &dropped), CloseDisposition::Benign);
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn test_open_sends_init_and_forwards_frames() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap().into_text().unwrap();
            ws.send(Message::Text(r#"{"type":"state","state":"idle"}"#.into()))
                .await
                .unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Library(4001),
                reason: "dup".into(),
            }))
            .await
            .unwrap();
            first
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::open(&url, 3, tx.downgrade(), OutboundMessage::Interrupt)
            .await
            .unwrap();

        match rx.recv().await {
            Some(Inbound::SignalingFrame { generation: 3, text }) => {
                assert!(text.contains("idle"));
            }
            other => panic!("expected frame, got {other:?}"),
        }
        match rx.recv().await {
            Some(Inbound::SignalingClosed {
                generation: 3,
                code,
                reason,
            }) => {
                assert_eq!(code, 4001);
                assert_eq!(reason, "dup");
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(server.await.unwrap(), r#"{"type":"interrupt"}"#);
    }

    #[tokio::test]
    async fn test_local_close_is_idempotent_and_silent() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut close_code = None;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(Some(frame)) = msg {
                    close_code = Some(u16::from(frame.code));
                }
            }
            close_code
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel =
            SignalingChannel::open(&url, 1, tx.downgrade(), OutboundMessage::Interrupt)
                .await
                .unwrap();
        channel.close().await;
        channel.close().await;
        assert!(channel.closed);
        assert!(channel.send(&OutboundMessage::Interrupt).await.is_err());

        assert_eq!(server.await.unwrap(), Some(NORMAL_CLOSE));
        assert!(rx.try_recv().is_err(), "a local close reports nothing");
    }

    #[tokio::test]
    async fn test_dropped_connection_reports_abnormal_code() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.next().await.unwrap().unwrap();
            // Dropping the stream closes the socket without a close frame.
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = SignalingChannel::open(&url, 2, tx.downgrade(), OutboundMessage::Interrupt)
            .await
            .unwrap();
        server.await.unwrap();

        match rx.recv().await {
            Some(Inbound::SignalingClosed {
                generation: 2,
                code,
                reason,
            }) => {
                assert_eq!(code, 1006);
                assert!(reason.is_empty());
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_failure_is_a_connection_error() {
        let (listener, url) = listen().await;
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = SignalingChannel::open(&url, 1, tx.downgrade(), OutboundMessage::Interrupt)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Connection(_)));
    }
}
