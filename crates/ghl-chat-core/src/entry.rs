//! Conversation transcript entries.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

const ENTRY_ID_PREFIX: &str = "msg_";

/// Identifier of a transcript entry.
///
/// Minted by [`Transcript`](crate::Transcript) in insertion order, so ids of
/// one transcript are unique and strictly increasing. Rendered and
/// serialized as `msg_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

/// String that is not a `msg_<n>` entry id.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Invalid entry id: {0:?}")]
pub struct ParseEntryIdError(String);

impl EntryId {
    /// Raw sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) const fn new(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ENTRY_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(ENTRY_ID_PREFIX)
            .and_then(|seq| seq.parse().ok())
            .map(Self)
            .ok_or_else(|| ParseEntryIdError(s.to_string()))
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text submitted locally.
    User,
    /// Reply from the remote assistant.
    Assistant,
    /// Notices from the remote endpoint.
    System,
}

/// Fields of an entry before the transcript assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl NewEntry {
    /// Entry with no intent or payload.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: timestamp.into(),
            intent: None,
            payload: None,
        }
    }

    /// User entry stamped with the current time.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, now_timestamp())
    }

    /// Attach the intent the remote classified the request as.
    #[must_use]
    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }

    /// Attach structured data returned alongside the text.
    #[must_use]
    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// One immutable line of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: EntryId,
    pub role: Role,
    pub text: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ConversationEntry {
    pub(crate) fn from_new(id: EntryId, entry: NewEntry) -> Self {
        Self {
            id,
            role: entry.role,
            text: entry.text,
            timestamp: entry.timestamp,
            intent: entry.intent,
            payload: entry.payload,
        }
    }
}

/// Current time as an RFC 3339 string.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
