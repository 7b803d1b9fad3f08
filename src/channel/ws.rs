//! Duplex WebSocket channel to the recognition service
//!
//! One connection per session, established once and never reconnected: a
//! live stream cannot be replayed from the point of loss, so a dropped
//! connection is fatal and the caller starts a fresh session.

use super::events::TranscriptEvent;
use crate::audio::AudioFrame;
use crate::error::ChannelError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TranscriptChannel {
    inner: WsStream,
}

impl TranscriptChannel {
    /// Open the duplex connection for `(language, session_id)`
    pub async fn connect(
        base_url: &str,
        language: &str,
        session_id: &str,
    ) -> Result<Self, ChannelError> {
        let url = format!(
            "{}/ws/transcribe?lang={}&session_id={}",
            base_url.trim_end_matches('/'),
            language,
            session_id
        );

        info!("Connecting to recognition service at {}", url);

        let (inner, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| ChannelError::Connect {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        info!("Recognition channel open (session {})", session_id);

        Ok(Self { inner })
    }

    /// Split into the outbound frame path and the inbound event path
    pub fn into_split(self) -> (FrameSink, EventStream) {
        let (sink, stream) = self.inner.split();
        (FrameSink { sink }, EventStream { stream })
    }
}

/// Outbound half: raw PCM16 frames, one binary message per frame
pub struct FrameSink {
    sink: SplitSink<WsStream, Message>,
}

impl FrameSink {
    pub async fn send(&mut self, frame: &AudioFrame) -> Result<(), ChannelError> {
        let payload = frame.to_pcm_bytes();
        debug!(
            "Sending frame {} ({} bytes)",
            frame.sequence,
            payload.len()
        );
        self.sink
            .send(Message::Binary(payload))
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))
    }

    /// Signal end-of-stream: close the outbound direction so the service
    /// can flush trailing final/entity events before tearing down.
    pub async fn finish(&mut self) -> Result<(), ChannelError> {
        self.sink
            .close()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))
    }
}

/// Inbound half: structured transcript events
pub struct EventStream {
    stream: SplitStream<WsStream>,
}

impl EventStream {
    /// Next well-formed transcript event
    ///
    /// Malformed payloads and unknown tags are skipped (logged by the
    /// parser) without closing the connection. `Ok(None)` means the peer
    /// closed; `Err` means the transport failed.
    pub async fn next_event(&mut self) -> Result<Option<TranscriptEvent>, ChannelError> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(Message::Text(text)) => {
                    if let Some(event) = TranscriptEvent::parse(&text) {
                        return Ok(Some(event));
                    }
                }
                Ok(Message::Close(_)) => return Ok(None),
                // Pings, pongs, unexpected binary: nothing to merge
                Ok(_) => {}
                Err(e) => return Err(ChannelError::ConnectionLost(e.to_string())),
            }
        }
        Ok(None)
    }
}
