//! WebSocket transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ghl_chat_core::{
    Frame, Transport, TransportError, TransportSession, traits::CLOSE_NO_STATUS,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

/// Handshake timeout used by [`WsTransport::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket sessions with `tokio-tungstenite`.
///
/// Only plain `ws://` endpoints are supported; no TLS backend is compiled in.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsTransport {
    /// Create a transport with the given handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        let handshake = tokio_tungstenite::connect_async(url);
        let (stream, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| match e {
                tungstenite::Error::Url(e) => TransportError::InvalidUrl(e.to_string()),
                other => TransportError::Connect(other.to_string()),
            })?;

        tracing::debug!(%url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsSession { stream }))
    }
}

struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportSession for WsSession {
    async fn recv(&mut self) -> Result<Frame, TransportError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => return Ok(Frame::abnormal("stream ended")),
            };

            let (code, reason) = match msg {
                Message::Text(text) => return Ok(Frame::Text(text.as_str().to_owned())),
                Message::Binary(data) => return Ok(Frame::Binary(data.to_vec())),
                Message::Close(Some(frame)) => {
                    (u16::from(frame.code), frame.reason.as_str().to_owned())
                }
                Message::Close(None) => (CLOSE_NO_STATUS, String::new()),
                // Pings are answered by tungstenite on the next read.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            // The session is dropped after this frame; flush the queued
            // close reply first so the peer sees a complete handshake.
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!("close reply not sent: {e}");
            }
            return Ok(Frame::Closed { code, reason });
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}
