//! Core types for the GoHighLevel assistant chat client.
//!
//! This crate provides the pieces shared by the transport and session layers:
//! - `ConnectionState` and `ReconnectPolicy`
//! - `Transcript` - Append-only history with live updates
//! - `ConversationEntry` - Immutable transcript line
//! - `Transport` traits for the duplex connection
//! - `ChatConfig` - File and environment configuration

pub mod config;
pub mod entry;
pub mod state;
pub mod traits;
pub mod transcript;

pub use config::{ChatConfig, ConfigError};
pub use entry::{ConversationEntry, EntryId, NewEntry, ParseEntryIdError, Role};
pub use state::{ConnectionState, ReconnectPolicy};
pub use traits::{Frame, Transport, TransportError, TransportSession};
pub use transcript::Transcript;
