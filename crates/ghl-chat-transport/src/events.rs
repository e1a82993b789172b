//! Notifications emitted by the chat client.

use std::time::Duration;

use ghl_chat_core::TransportError;

use crate::protocol::InboundEnvelope;

/// Client failure, reported through [`ClientEvent::Error`].
///
/// None of these stop the client; `connect` and `reconnect` stay usable.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(TransportError),
    #[error("Not connected, request dropped")]
    NotConnected,
    #[error("Attachments are not enabled, request dropped")]
    AttachmentsUnsupported,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Undecodable frame: {0}")]
    Decode(String),
    #[error("Transport error: {0}")]
    Transport(TransportError),
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Event delivered to the client's observer, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A session opened.
    Connected,
    /// The open session closed, remotely or by `disconnect`.
    Disconnected { code: u16, reason: String },
    /// Inbound envelope, in receipt order.
    Message(InboundEnvelope),
    /// Something failed.
    Error(ClientError),
    /// An automatic reconnect is pending. `attempt` counts from 1.
    ReconnectScheduled { attempt: u32, delay: Duration },
}
