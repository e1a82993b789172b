//! Transport abstraction for the duplex message connection.

use async_trait::async_trait;
use thiserror::Error;

/// Close code for a deliberate, normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Whether a close code asks the client to stay disconnected.
#[must_use]
pub const fn is_normal_closure(code: u16) -> bool {
    code == CLOSE_NORMAL
}

/// One unit received from an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
    /// The session ended. No further frames follow.
    Closed { code: u16, reason: String },
}

impl Frame {
    /// Closure frame for a dropped connection.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::Closed {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
        }
    }
}

/// Transport-level failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Session closed")]
    Closed,
}

/// Opens sessions to a remote message endpoint.
///
/// One transport serves any number of sequential sessions; the reconnecting
/// client asks for a fresh session after every drop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// An open duplex session.
#[async_trait]
pub trait TransportSession: Send {
    /// Wait for the next frame. Returns [`Frame::Closed`] once the session ends.
    ///
    /// # Errors
    /// Returns error if the underlying connection fails.
    async fn recv(&mut self) -> Result<Frame, TransportError>;

    /// Write a text message.
    ///
    /// # Errors
    /// Returns error if the session can no longer be written to.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the session with the given code.
    ///
    /// # Errors
    /// Returns error if the close handshake could not be started.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}
