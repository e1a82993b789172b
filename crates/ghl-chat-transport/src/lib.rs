//! Reconnecting duplex chat client.
//!
//! Provides:
//! - Wire protocol (JSON envelopes, base64 attachments)
//! - Connection state machine with exponential backoff
//! - [`ChatClient`], the async handle driving one logical connection
//! - WebSocket transport (feature: websocket)
//! - In-memory scripted transport (feature: testing)

pub mod client;
pub mod events;
pub mod protocol;
pub mod reconnect;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ChatClient, ClientOptions};
pub use events::{ClientError, ClientEvent};
pub use protocol::{Attachment, InboundEnvelope, OutboundRequest};
pub use reconnect::ConnectionMachine;

#[cfg(feature = "websocket")]
pub use websocket::WsTransport;
