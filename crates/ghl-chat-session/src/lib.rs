//! Conversation state for the assistant chat.
//!
//! Provides:
//! - `ConversationController` - transcript, composing flag and suggestions
//!   driven by a `ChatClient`

pub mod controller;

pub use controller::{ConversationController, SubmitError};
